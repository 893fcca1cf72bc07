//! `EnginePort` implementation over the streaming engine's HTTP SQL
//! endpoint: SQL text goes in the POST body, results come back as
//! `FORMAT JSON` (point queries) or `FORMAT JSONEachRow` (subscriptions).
//!
//! The client owns connection lifecycle: a startup ping loop, bounded
//! retries with jittered exponential backoff around every call, and a
//! reconnect (client rebuild + fresh ping) whenever a transport error
//! suggests the connection is gone.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use domain::engine::entity::{Column, Row, SqlValue};
use domain::engine::error::EngineError;
use domain::schema::{catalog, sql};
use ports::secondary::engine_port::{EnginePort, RowSink};

/// Ping attempts before startup gives up on the engine.
const CONNECT_ATTEMPTS: usize = 5;
/// Delay between startup ping attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Attempts inside one reconnect loop.
const RECONNECT_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// `host:port` of the engine's HTTP SQL endpoint.
    pub address: String,
    pub username: String,
    pub password: String,
    /// Database the session operates in.
    pub workspace: String,
    /// Deadline for one bounded query or DDL attempt.
    pub query_timeout: Duration,
    /// Deadline for a liveness ping.
    pub ping_timeout: Duration,
    /// Deadline for a whole reconnect loop.
    pub reconnect_timeout: Duration,
    /// Attempts per call (initial try included).
    pub max_retries: usize,
    /// Upper bound for the per-retry backoff before jitter.
    pub backoff_cap: Duration,
}

impl EngineOptions {
    pub fn new(address: &str, username: &str, password: &str, workspace: &str) -> Self {
        Self {
            address: address.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            workspace: workspace.to_string(),
            query_timeout: Duration::from_secs(15),
            ping_timeout: Duration::from_secs(5),
            reconnect_timeout: Duration::from_secs(20),
            max_retries: 5,
            backoff_cap: Duration::from_secs(20),
        }
    }

    fn base_url(&self) -> String {
        let address = self
            .address
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        format!("http://{address}")
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Vec<Row>,
}

pub struct HttpEngineClient {
    options: EngineOptions,
    base_url: String,
    client: RwLock<reqwest::Client>,
}

impl HttpEngineClient {
    /// Build the client and verify liveness with a bounded ping loop.
    /// Failing every attempt is fatal: the gateway cannot run without its
    /// engine.
    pub async fn connect(options: EngineOptions) -> Result<Self, EngineError> {
        let base_url = options.base_url();
        tracing::info!(
            address = %base_url,
            workspace = %options.workspace,
            "connecting to streaming engine"
        );
        let client = Self {
            base_url,
            client: RwLock::new(build_client(Some(options.query_timeout))?),
            options,
        };

        let mut last_error = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            match tokio::time::timeout(client.options.ping_timeout, client.ping_once()).await {
                Ok(Ok(())) => {
                    tracing::info!("connected to streaming engine");
                    return Ok(client);
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "engine ping failed");
                    last_error = Some(e);
                }
                Err(_elapsed) => {
                    tracing::warn!(attempt = attempt + 1, "engine ping timed out");
                    last_error = Some(EngineError::Transient("ping timed out".to_string()));
                }
            }
        }
        Err(EngineError::Unavailable(format!(
            "could not reach engine after {CONNECT_ATTEMPTS} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn http(&self) -> reqwest::Client {
        self.client.read().await.clone()
    }

    fn request(&self, client: &reqwest::Client, format: Option<&str>) -> reqwest::RequestBuilder {
        let mut builder = client
            .post(&self.base_url)
            .query(&[("database", self.options.workspace.as_str())])
            .basic_auth(&self.options.username, Some(&self.options.password));
        if let Some(format) = format {
            builder = builder.query(&[("default_format", format)]);
        }
        builder
    }

    async fn ping_once(&self) -> Result<(), EngineError> {
        let client = self.http().await;
        let response = self
            .request(&client, None)
            .body("SELECT 1")
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_response(status, &body))
        }
    }

    async fn execute_once(&self, statement: &str) -> Result<(), EngineError> {
        let client = self.http().await;
        let response = self
            .request(&client, None)
            .body(statement.to_string())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_response(status, &body))
        }
    }

    async fn query_once(&self, statement: &str) -> Result<Vec<Row>, EngineError> {
        let client = self.http().await;
        let response = self
            .request(&client, Some("JSON"))
            .body(statement.to_string())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &body));
        }
        let payload: QueryResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("malformed engine response: {e}")))?;
        Ok(payload.data)
    }

    async fn execute_with_retry(&self, statement: &str) -> Result<(), EngineError> {
        let mut last_error: Option<EngineError> = None;
        for attempt in 0..self.options.max_retries {
            if attempt > 0 {
                self.recover(last_error.as_ref()).await;
                tokio::time::sleep(retry_backoff(attempt, self.options.backoff_cap)).await;
            }
            match self.execute_once(statement).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "engine statement failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.exhausted("statement", last_error))
    }

    async fn query_with_retry(&self, statement: &str) -> Result<Vec<Row>, EngineError> {
        let mut last_error: Option<EngineError> = None;
        for attempt in 0..self.options.max_retries {
            if attempt > 0 {
                self.recover(last_error.as_ref()).await;
                tokio::time::sleep(retry_backoff(attempt, self.options.backoff_cap)).await;
            }
            match self.query_once(statement).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "engine query failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.exhausted("query", last_error))
    }

    fn exhausted(&self, what: &str, last_error: Option<EngineError>) -> EngineError {
        EngineError::Unavailable(format!(
            "{what} failed after {} attempts: {}",
            self.options.max_retries,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ))
    }

    /// Transport errors mean the connection is likely gone; rebuild the
    /// client and ping before the next attempt. Failures here are logged,
    /// not surfaced: the retry loop makes the final call.
    async fn recover(&self, last_error: Option<&EngineError>) {
        if !matches!(last_error, Some(EngineError::Transient(_))) {
            return;
        }
        match tokio::time::timeout(self.options.reconnect_timeout, self.reconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "reconnect failed"),
            Err(_elapsed) => tracing::warn!("reconnect deadline exceeded"),
        }
    }

    async fn reconnect(&self) -> Result<(), EngineError> {
        tracing::info!("attempting to reconnect to the engine");
        let mut last_error: Option<EngineError> = None;
        for attempt in 0..RECONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(reconnect_backoff(attempt)).await;
            }
            let fresh = build_client(Some(self.options.query_timeout))?;
            {
                let mut guard = self.client.write().await;
                *guard = fresh;
            }
            match tokio::time::timeout(self.options.ping_timeout, self.ping_once()).await {
                Ok(Ok(())) => {
                    tracing::info!("reconnected to the engine");
                    return Ok(());
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(_elapsed) => {
                    last_error = Some(EngineError::Transient("ping timed out".to_string()));
                }
            }
        }
        Err(EngineError::Unavailable(format!(
            "reconnect failed after {RECONNECT_ATTEMPTS} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[async_trait]
impl EnginePort for HttpEngineClient {
    async fn ping(&self) -> Result<(), EngineError> {
        match tokio::time::timeout(self.options.ping_timeout, self.ping_once()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(EngineError::Transient("ping timed out".to_string())),
        }
    }

    async fn stream_exists(&self, name: &str) -> Result<bool, EngineError> {
        let rows = self
            .query_with_retry(&format!("SHOW STREAMS LIKE '{}'", sql::escape(name)))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn view_exists(&self, name: &str) -> Result<bool, EngineError> {
        // Views share the stream catalog in the engine.
        self.stream_exists(name).await
    }

    async fn ensure_mutable_stream(
        &self,
        name: &str,
        columns: &[Column],
        primary_key: &[&str],
    ) -> Result<(), EngineError> {
        if self.stream_exists(name).await? {
            tracing::debug!(stream = %name, "mutable stream already exists");
            return Ok(());
        }
        self.execute_with_retry(&catalog::create_mutable_stream_ddl(name, columns, primary_key))
            .await?;
        tracing::info!(stream = %name, "created mutable stream");
        Ok(())
    }

    async fn create_stream(&self, name: &str, columns: &[Column]) -> Result<(), EngineError> {
        self.execute_with_retry(&catalog::create_stream_ddl(name, columns))
            .await
    }

    async fn drop_stream(&self, name: &str) -> Result<(), EngineError> {
        self.execute_with_retry(&catalog::drop_stream_ddl(name)).await
    }

    async fn create_materialized_view(&self, name: &str, ddl: &str) -> Result<(), EngineError> {
        tracing::debug!(view = %name, "creating materialized view");
        self.execute_with_retry(ddl).await
    }

    async fn drop_materialized_view(&self, name: &str) -> Result<(), EngineError> {
        self.execute_with_retry(&catalog::drop_materialized_view_ddl(name))
            .await
    }

    async fn drop_view(&self, name: &str) -> Result<(), EngineError> {
        self.execute_with_retry(&catalog::drop_view_ddl(name)).await
    }

    async fn execute_ddl(&self, statement: &str) -> Result<(), EngineError> {
        self.execute_with_retry(statement).await
    }

    async fn query(&self, statement: &str) -> Result<Vec<Row>, EngineError> {
        self.query_with_retry(statement).await
    }

    async fn stream_query(
        &self,
        statement: &str,
        cancel: CancellationToken,
        mut sink: RowSink,
    ) -> Result<(), EngineError> {
        // A subscription has no natural end, so it gets a dedicated client
        // without the per-request deadline.
        let client = build_client(None)?;
        let response = self
            .request(&client, Some("JSONEachRow"))
            .body(statement.to_string())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        for line in drain_lines(&mut buffer) {
                            deliver_line(&line, &mut sink);
                        }
                    }
                    Some(Err(e)) => return Err(transport_error(e)),
                    None => {
                        if !buffer.is_empty() {
                            let line = std::mem::take(&mut buffer);
                            deliver_line(&line, &mut sink);
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn insert(
        &self,
        stream: &str,
        columns: &[&str],
        values: &[SqlValue],
    ) -> Result<(), EngineError> {
        let statement = insert_sql(stream, columns, values)?;
        self.execute_with_retry(&statement).await
    }
}

fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, EngineError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .user_agent("alert-gateway/0.1");
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| EngineError::Unavailable(format!("HTTP client init failed: {e}")))
}

/// Render a validated single-row insert.
fn insert_sql(stream: &str, columns: &[&str], values: &[SqlValue]) -> Result<String, EngineError> {
    if columns.is_empty() {
        return Err(EngineError::BadSql("insert requires columns".to_string()));
    }
    if columns.len() != values.len() {
        return Err(EngineError::BadSql(format!(
            "column/value count mismatch: {} columns, {} values",
            columns.len(),
            values.len()
        )));
    }
    let rendered: Vec<String> = values.iter().map(SqlValue::to_sql).collect();
    Ok(format!(
        "INSERT INTO {stream} ({}) VALUES ({})",
        columns.join(", "),
        rendered.join(", ")
    ))
}

/// Split complete newline-terminated frames out of the buffer, leaving any
/// trailing partial line behind.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        lines.push(line);
    }
    lines
}

fn deliver_line(line: &[u8], sink: &mut RowSink) {
    if line.is_empty() {
        return;
    }
    match serde_json::from_slice::<Row>(line) {
        Ok(row) => sink(row),
        Err(e) => tracing::warn!(error = %e, "skipping unparseable row from stream"),
    }
}

fn transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Transient(e.to_string())
}

/// Map an engine error response onto the gateway taxonomy by the message
/// text, the way the wire protocol reports them.
fn classify_response(status: StatusCode, body: &str) -> EngineError {
    let message: String = body.chars().take(300).collect();
    let lower = message.to_lowercase();
    if lower.contains("already exists") {
        EngineError::AlreadyExists(message)
    } else if lower.contains("doesn't exist")
        || lower.contains("does not exist")
        || lower.contains("unknown table")
        || lower.contains("unknown stream")
    {
        EngineError::NotFound(message)
    } else if lower.contains("syntax error")
        || lower.contains("cannot parse")
        || lower.contains("unknown identifier")
        || lower.contains("unknown function")
        || lower.contains("missing columns")
    {
        EngineError::BadSql(message)
    } else if status.is_server_error() {
        EngineError::Transient(format!("engine returned {status}: {message}"))
    } else {
        EngineError::BadSql(format!("engine returned {status}: {message}"))
    }
}

/// `min(2^attempt, cap) × (0.75 + 0.5·rand)`.
fn retry_backoff(attempt: usize, cap: Duration) -> Duration {
    let exponent = u32::try_from(attempt.min(16)).unwrap_or(16);
    let base = Duration::from_secs(1u64 << exponent).min(cap);
    base.mul_f64(0.75 + 0.5 * rand::thread_rng().gen::<f64>())
}

/// Capped exponential with wider jitter for the reconnect loop.
fn reconnect_backoff(attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt.min(5)).unwrap_or(5);
    let base = Duration::from_secs(1u64 << exponent).min(Duration::from_secs(30));
    base.mul_f64(0.5 + 0.5 * rand::thread_rng().gen::<f64>())
}
