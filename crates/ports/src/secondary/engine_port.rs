use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use domain::engine::entity::{Column, Row, SqlValue};
use domain::engine::error::EngineError;

/// Per-row consumer for streaming queries.
pub type RowSink = Box<dyn FnMut(Row) + Send>;

/// Secondary port over the streaming database.
///
/// The single seam between the gateway and the engine: implementations own
/// connection lifecycle (connect, ping, reconnect with bounded backoff) and
/// retry transient I/O internally, so callers only see the final
/// [`EngineError`]. Dyn-compatible so services can hold `Arc<dyn EnginePort>`.
#[async_trait]
pub trait EnginePort: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Whether a stream with this exact name exists in the catalog.
    async fn stream_exists(&self, name: &str) -> Result<bool, EngineError>;

    /// Whether a view with this exact name exists. Views share the stream
    /// catalog in the engine, so this matches streams too.
    async fn view_exists(&self, name: &str) -> Result<bool, EngineError>;

    /// Create a mutable stream with the given primary key unless one with
    /// this name already exists.
    async fn ensure_mutable_stream(
        &self,
        name: &str,
        columns: &[Column],
        primary_key: &[&str],
    ) -> Result<(), EngineError>;

    /// Create an append-only stream (`IF NOT EXISTS` semantics).
    async fn create_stream(&self, name: &str, columns: &[Column]) -> Result<(), EngineError>;

    /// Drop a stream; no-op when absent.
    async fn drop_stream(&self, name: &str) -> Result<(), EngineError>;

    /// Execute a full `CREATE MATERIALIZED VIEW …` statement. Fails with
    /// `AlreadyExists` on name conflicts; callers drop first.
    async fn create_materialized_view(&self, name: &str, ddl: &str) -> Result<(), EngineError>;

    /// Drop a materialized view; no-op when absent.
    async fn drop_materialized_view(&self, name: &str) -> Result<(), EngineError>;

    /// Drop a plain view; no-op when absent.
    async fn drop_view(&self, name: &str) -> Result<(), EngineError>;

    /// Fire-and-forget DDL execution.
    async fn execute_ddl(&self, sql: &str) -> Result<(), EngineError>;

    /// Run a bounded query and return the complete result set.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, EngineError>;

    /// Open a streaming subscription, delivering each row to `sink` until
    /// the query terminates or `cancel` fires. Returns the terminal error,
    /// `Cancelled` included.
    async fn stream_query(
        &self,
        sql: &str,
        cancel: CancellationToken,
        sink: RowSink,
    ) -> Result<(), EngineError>;

    /// Validated insert of one row of typed values.
    async fn insert(
        &self,
        stream: &str,
        columns: &[&str],
        values: &[SqlValue],
    ) -> Result<(), EngineError>;
}
