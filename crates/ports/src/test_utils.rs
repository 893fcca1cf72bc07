//! Scriptable in-memory engine for exercising services without a live
//! streaming database.
//!
//! Statements are recorded in execution order; query results and injected
//! failures are matched by SQL substring so tests stay independent of call
//! ordering inside the code under test.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use domain::engine::entity::{Column, Row, SqlValue};
use domain::engine::error::EngineError;
use domain::schema::catalog;

use crate::secondary::engine_port::{EnginePort, RowSink};

#[derive(Debug, Clone)]
pub struct InsertRecord {
    pub stream: String,
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

#[derive(Default)]
pub struct MockEngine {
    executed: Mutex<Vec<String>>,
    inserts: Mutex<Vec<InsertRecord>>,
    query_rules: Mutex<Vec<(String, Vec<Row>)>>,
    fail_rules: Mutex<Vec<(String, EngineError)>>,
    streams: Mutex<HashSet<String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries containing `pattern` return these rows (first match wins,
    /// in registration order). Unmatched queries return no rows.
    pub fn on_query(&self, pattern: &str, rows: Vec<Row>) {
        self.query_rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), rows));
    }

    /// Any statement containing `pattern` fails with `err` (persistently).
    pub fn fail_matching(&self, pattern: &str, err: EngineError) {
        self.fail_rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), err));
    }

    /// Pre-register an existing stream or view.
    pub fn add_stream(&self, name: &str) {
        self.streams.lock().unwrap().insert(name.to_string());
    }

    pub fn has_stream(&self, name: &str) -> bool {
        self.streams.lock().unwrap().contains(name)
    }

    /// Every statement executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn inserted(&self) -> Vec<InsertRecord> {
        self.inserts.lock().unwrap().clone()
    }

    fn check_fail(&self, statement: &str) -> Result<(), EngineError> {
        for (pattern, err) in self.fail_rules.lock().unwrap().iter() {
            if statement.contains(pattern.as_str()) {
                return Err(err.clone());
            }
        }
        Ok(())
    }

    fn record(&self, statement: String) {
        self.executed.lock().unwrap().push(statement);
    }

    fn matched_rows(&self, sql: &str) -> Vec<Row> {
        for (pattern, rows) in self.query_rules.lock().unwrap().iter() {
            if sql.contains(pattern.as_str()) {
                return rows.clone();
            }
        }
        Vec::new()
    }
}

#[async_trait]
impl EnginePort for MockEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.check_fail("ping")
    }

    async fn stream_exists(&self, name: &str) -> Result<bool, EngineError> {
        self.check_fail(name)?;
        Ok(self.has_stream(name))
    }

    async fn view_exists(&self, name: &str) -> Result<bool, EngineError> {
        self.check_fail(name)?;
        Ok(self.has_stream(name))
    }

    async fn ensure_mutable_stream(
        &self,
        name: &str,
        columns: &[Column],
        primary_key: &[&str],
    ) -> Result<(), EngineError> {
        self.check_fail(name)?;
        if self.has_stream(name) {
            return Ok(());
        }
        let ddl = catalog::create_mutable_stream_ddl(name, columns, primary_key);
        self.check_fail(&ddl)?;
        self.record(ddl);
        self.add_stream(name);
        Ok(())
    }

    async fn create_stream(&self, name: &str, columns: &[Column]) -> Result<(), EngineError> {
        let ddl = catalog::create_stream_ddl(name, columns);
        self.check_fail(&ddl)?;
        self.record(ddl);
        self.add_stream(name);
        Ok(())
    }

    async fn drop_stream(&self, name: &str) -> Result<(), EngineError> {
        let ddl = catalog::drop_stream_ddl(name);
        self.check_fail(&ddl)?;
        self.record(ddl);
        self.streams.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create_materialized_view(&self, name: &str, ddl: &str) -> Result<(), EngineError> {
        self.check_fail(ddl)?;
        self.record(ddl.to_string());
        self.add_stream(name);
        Ok(())
    }

    async fn drop_materialized_view(&self, name: &str) -> Result<(), EngineError> {
        let ddl = catalog::drop_materialized_view_ddl(name);
        self.check_fail(&ddl)?;
        self.record(ddl);
        self.streams.lock().unwrap().remove(name);
        Ok(())
    }

    async fn drop_view(&self, name: &str) -> Result<(), EngineError> {
        let ddl = catalog::drop_view_ddl(name);
        self.check_fail(&ddl)?;
        self.record(ddl);
        self.streams.lock().unwrap().remove(name);
        Ok(())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), EngineError> {
        self.check_fail(sql)?;
        self.record(sql.to_string());
        // Keep the catalog roughly coherent for CREATE/DROP VIEW text.
        if let Some(rest) = sql.strip_prefix("CREATE VIEW ") {
            if let Some(name) = rest.split_whitespace().next() {
                self.add_stream(name);
            }
        }
        if let Some(name) = sql.strip_prefix("DROP VIEW IF EXISTS ") {
            self.streams.lock().unwrap().remove(name.trim());
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, EngineError> {
        self.check_fail(sql)?;
        self.record(sql.to_string());
        Ok(self.matched_rows(sql))
    }

    async fn stream_query(
        &self,
        sql: &str,
        cancel: CancellationToken,
        mut sink: RowSink,
    ) -> Result<(), EngineError> {
        self.check_fail(sql)?;
        self.record(sql.to_string());
        for row in self.matched_rows(sql) {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            sink(row);
        }
        Ok(())
    }

    async fn insert(
        &self,
        stream: &str,
        columns: &[&str],
        values: &[SqlValue],
    ) -> Result<(), EngineError> {
        self.check_fail(stream)?;
        if columns.len() != values.len() {
            return Err(EngineError::BadSql(format!(
                "column/value count mismatch: {} vs {}",
                columns.len(),
                values.len()
            )));
        }
        self.record(format!("INSERT INTO {stream}"));
        self.inserts.lock().unwrap().push(InsertRecord {
            stream: stream.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            values: values.to_vec(),
        });
        Ok(())
    }
}

/// Build a [`Row`] from key/value pairs.
pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Build `DESCRIBE`-shaped rows (`name` / `type` columns).
pub fn describe_rows(columns: &[(&str, &str)]) -> Vec<Row> {
    columns
        .iter()
        .map(|(name, data_type)| {
            row(&[
                ("name", serde_json::json!(name)),
                ("type", serde_json::json!(data_type)),
            ])
        })
        .collect()
}
