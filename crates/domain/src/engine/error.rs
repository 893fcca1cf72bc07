use thiserror::Error;

/// Failure taxonomy of the streaming-engine gateway.
///
/// `Transient` covers short disconnects and I/O hiccups; the gateway retries
/// those internally and escalates to `Unavailable` once the retry budget is
/// exhausted. `BadSql` is surfaced immediately and never retried.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transient engine error: {0}")]
    Transient(String),

    #[error("bad SQL: {0}")]
    BadSql(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("query cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the gateway should retry (after a reconnect attempt).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
