use thiserror::Error;

use crate::engine::error::EngineError;
use crate::rule::entity::RuleStatus;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule not found: {0}")]
    NotFound(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("rule {id} cannot {operation} while {status}")]
    InvalidState {
        id: String,
        operation: &'static str,
        status: RuleStatus,
    },

    #[error("rule compilation failed: {0}")]
    Compile(String),

    #[error("catalog bootstrap failed: {0}")]
    Catalog(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
