//! Persistent rule catalog over the mutable `tp_rules` stream.
//!
//! Every write is a full-row insert; the stream's primary key on `id` makes
//! it an upsert, so the latest row per id is the current record and history
//! stays queryable through `_tp_time`.

use std::sync::Arc;

use chrono::Utc;

use domain::engine::entity::{self as rows, Row, SqlValue};
use domain::rule::entity::{Rule, RuleStatus};
use domain::rule::error::RuleError;
use domain::schema::{catalog, sql};
use ports::secondary::engine_port::EnginePort;

const RULE_COLUMNS: [&str; 19] = [
    "id",
    "name",
    "description",
    "query",
    "resolve_query",
    "status",
    "severity",
    "throttle_minutes",
    "entity_id_columns",
    "created_at",
    "updated_at",
    "last_triggered_at",
    "result_stream",
    "view_name",
    "resolve_view_name",
    "last_error",
    "dedicated_alert_acks_stream",
    "alert_acks_stream_name",
    "active",
];

pub struct RuleStore {
    engine: Arc<dyn EnginePort>,
}

impl RuleStore {
    pub fn new(engine: Arc<dyn EnginePort>) -> Self {
        Self { engine }
    }

    /// Insert the full rule row. `active = false` marks a soft-deleted record.
    pub async fn persist(&self, rule: &Rule, active: bool) -> Result<(), RuleError> {
        let values = [
            SqlValue::from(rule.id.clone()),
            SqlValue::from(rule.name.clone()),
            SqlValue::from(rule.description.clone()),
            SqlValue::from(rule.query.clone()),
            SqlValue::opt_text(rule.resolve_query.as_deref()),
            SqlValue::from(rule.status.as_str()),
            SqlValue::from(rule.severity.as_str()),
            SqlValue::from(rule.throttle_minutes),
            SqlValue::from(rule.entity_id_columns.clone()),
            SqlValue::from(rule.created_at),
            SqlValue::from(rule.updated_at),
            SqlValue::opt_timestamp(rule.last_triggered_at),
            SqlValue::from(rule.result_stream.clone()),
            SqlValue::from(rule.view_name.clone()),
            SqlValue::opt_text(rule.resolve_view_name.as_deref()),
            SqlValue::opt_text(rule.last_error.as_deref()),
            SqlValue::opt_bool(rule.dedicated_alert_acks_stream),
            SqlValue::opt_text(rule.alert_acks_stream_name.as_deref()),
            SqlValue::from(active),
        ];
        self.engine
            .insert(catalog::RULES_STREAM, &RULE_COLUMNS, &values)
            .await?;
        Ok(())
    }

    /// Latest active record for the id.
    pub async fn get(&self, id: &str) -> Result<Rule, RuleError> {
        let rows = self.engine.query(&select_rules_sql(Some(id))).await?;
        rows.first()
            .map(rule_from_row)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))
    }

    /// All active records, latest version each.
    pub async fn list(&self) -> Result<Vec<Rule>, RuleError> {
        let rows = self.engine.query(&select_rules_sql(None)).await?;
        Ok(rows.iter().map(rule_from_row).collect())
    }

    /// Rewrite the record as inactive. The row survives for history; the
    /// engine artifacts are the lifecycle manager's problem.
    pub async fn soft_delete(&self, rule: &mut Rule) -> Result<(), RuleError> {
        rule.status = RuleStatus::Stopped;
        rule.updated_at = Utc::now();
        self.persist(rule, false).await
    }
}

fn select_rules_sql(id: Option<&str>) -> String {
    let mut filter = "WHERE active = true".to_string();
    if let Some(id) = id {
        filter.push_str(&format!(" AND id = {}", sql::quote(id)));
    }
    format!(
        "SELECT id, name, description, query, resolve_query, status, severity, \
         throttle_minutes, entity_id_columns, created_at, updated_at, last_triggered_at, \
         result_stream, view_name, resolve_view_name, last_error, \
         dedicated_alert_acks_stream, alert_acks_stream_name \
         FROM (\
         SELECT *, row_number() OVER (PARTITION BY id ORDER BY _tp_time DESC) AS row_num \
         FROM table({stream}) {filter}\
         ) WHERE row_num = 1",
        stream = catalog::RULES_STREAM,
    )
}

fn rule_from_row(row: &Row) -> Rule {
    Rule {
        id: rows::get_string(row, "id"),
        name: rows::get_string(row, "name"),
        description: rows::get_string(row, "description"),
        query: rows::get_string(row, "query"),
        resolve_query: rows::get_opt_string(row, "resolve_query"),
        status: rows::get_string(row, "status").parse().unwrap_or_default(),
        severity: rows::get_string(row, "severity").parse().unwrap_or_default(),
        throttle_minutes: rows::get_i32(row, "throttle_minutes"),
        entity_id_columns: rows::get_string(row, "entity_id_columns"),
        created_at: rows::get_datetime(row, "created_at").unwrap_or_default(),
        updated_at: rows::get_datetime(row, "updated_at").unwrap_or_default(),
        last_triggered_at: rows::get_datetime(row, "last_triggered_at"),
        dedicated_alert_acks_stream: rows::get_opt_bool(row, "dedicated_alert_acks_stream"),
        alert_acks_stream_name: rows::get_opt_string(row, "alert_acks_stream_name"),
        result_stream: rows::get_string(row, "result_stream"),
        view_name: rows::get_string(row, "view_name"),
        resolve_view_name: rows::get_opt_string(row, "resolve_view_name"),
        last_error: rows::get_opt_string(row, "last_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::rule::entity::Severity;
    use ports::test_utils::{row, InsertRecord, MockEngine};
    use serde_json::json;

    /// Re-shape an insert back into a result row, the way the engine would
    /// serve it from `table(tp_rules)`.
    fn insert_to_row(insert: &InsertRecord) -> Row {
        insert
            .columns
            .iter()
            .zip(&insert.values)
            .map(|(column, value)| {
                let json = match value {
                    SqlValue::Null => json!(null),
                    SqlValue::Bool(b) => json!(b),
                    SqlValue::Int(i) => json!(i),
                    SqlValue::Float(f) => json!(f),
                    SqlValue::Text(s) => json!(s),
                    SqlValue::Timestamp(t) => {
                        json!(t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                    }
                };
                (column.clone(), json)
            })
            .collect()
    }

    fn sample_rule() -> Rule {
        let now = Utc::now();
        Rule {
            id: "aaaa-bbbb".to_string(),
            name: "cpu high".to_string(),
            description: "cpu over threshold".to_string(),
            query: "SELECT host, usage FROM cpu WHERE usage > 90".to_string(),
            resolve_query: None,
            status: RuleStatus::Created,
            severity: Severity::Critical,
            throttle_minutes: 10,
            entity_id_columns: "host".to_string(),
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
            dedicated_alert_acks_stream: Some(false),
            alert_acks_stream_name: None,
            result_stream: "rule_aaaa_bbbb_results".to_string(),
            view_name: "rule_aaaa_bbbb_view".to_string(),
            resolve_view_name: None,
            last_error: None,
        }
    }

    fn persisted_row() -> Row {
        row(&[
            ("id", json!("aaaa-bbbb")),
            ("name", json!("cpu high")),
            ("description", json!("cpu over threshold")),
            ("query", json!("SELECT host, usage FROM cpu WHERE usage > 90")),
            ("resolve_query", json!(null)),
            ("status", json!("running")),
            ("severity", json!("critical")),
            ("throttle_minutes", json!(10)),
            ("entity_id_columns", json!("host")),
            ("created_at", json!("2025-06-01 10:00:00.000")),
            ("updated_at", json!("2025-06-01 10:05:00.000")),
            ("last_triggered_at", json!(null)),
            ("result_stream", json!("rule_aaaa_bbbb_results")),
            ("view_name", json!("rule_aaaa_bbbb_view")),
            ("resolve_view_name", json!(null)),
            ("last_error", json!(null)),
            ("dedicated_alert_acks_stream", json!(false)),
            ("alert_acks_stream_name", json!(null)),
        ])
    }

    #[tokio::test]
    async fn persist_writes_every_column() {
        let engine = Arc::new(MockEngine::new());
        let store = RuleStore::new(engine.clone());
        store.persist(&sample_rule(), true).await.unwrap();

        let inserts = engine.inserted();
        assert_eq!(inserts.len(), 1);
        let insert = &inserts[0];
        assert_eq!(insert.stream, "tp_rules");
        assert_eq!(insert.columns.len(), 19);
        assert_eq!(insert.values.len(), 19);
        assert_eq!(insert.values[0], SqlValue::Text("aaaa-bbbb".to_string()));
        assert_eq!(insert.values[5], SqlValue::Text("created".to_string()));
        // Unset optionals persist as engine nulls.
        assert_eq!(insert.values[4], SqlValue::Null);
        assert_eq!(insert.values[11], SqlValue::Null);
        // Explicit false is a bool, not null: create-time default.
        assert_eq!(insert.values[16], SqlValue::Bool(false));
        assert_eq!(insert.values[18], SqlValue::Bool(true));
    }

    #[tokio::test]
    async fn persist_keeps_unset_dedicated_flag_null() {
        let engine = Arc::new(MockEngine::new());
        let store = RuleStore::new(engine.clone());
        let mut rule = sample_rule();
        rule.dedicated_alert_acks_stream = None;
        store.persist(&rule, true).await.unwrap();
        assert_eq!(engine.inserted()[0].values[16], SqlValue::Null);
    }

    #[tokio::test]
    async fn persist_then_decode_round_trips_declared_fields() {
        let engine = Arc::new(MockEngine::new());
        let store = RuleStore::new(engine.clone());
        let mut rule = sample_rule();
        rule.resolve_query = Some("SELECT host FROM cpu WHERE usage < 50".to_string());
        rule.resolve_view_name = Some("rule_aaaa_bbbb_resolve_view".to_string());
        rule.alert_acks_stream_name = Some("custom_acks".to_string());
        store.persist(&rule, true).await.unwrap();

        let decoded = rule_from_row(&insert_to_row(&engine.inserted()[0]));
        assert_eq!(decoded.id, rule.id);
        assert_eq!(decoded.name, rule.name);
        assert_eq!(decoded.description, rule.description);
        assert_eq!(decoded.query, rule.query);
        assert_eq!(decoded.resolve_query, rule.resolve_query);
        assert_eq!(decoded.status, rule.status);
        assert_eq!(decoded.severity, rule.severity);
        assert_eq!(decoded.throttle_minutes, rule.throttle_minutes);
        assert_eq!(decoded.entity_id_columns, rule.entity_id_columns);
        assert_eq!(
            decoded.dedicated_alert_acks_stream,
            rule.dedicated_alert_acks_stream
        );
        assert_eq!(decoded.alert_acks_stream_name, rule.alert_acks_stream_name);
        assert_eq!(decoded.result_stream, rule.result_stream);
        assert_eq!(decoded.view_name, rule.view_name);
        assert_eq!(decoded.resolve_view_name, rule.resolve_view_name);
        assert_eq!(decoded.last_triggered_at, rule.last_triggered_at);
        assert_eq!(decoded.last_error, rule.last_error);
        assert_eq!(
            decoded.created_at.timestamp_millis(),
            rule.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn get_decodes_the_latest_row() {
        let engine = Arc::new(MockEngine::new());
        engine.on_query("AND id = 'aaaa-bbbb'", vec![persisted_row()]);
        let store = RuleStore::new(engine.clone());

        let rule = store.get("aaaa-bbbb").await.unwrap();
        assert_eq!(rule.name, "cpu high");
        assert_eq!(rule.status, RuleStatus::Running);
        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.throttle_minutes, 10);
        assert_eq!(rule.dedicated_alert_acks_stream, Some(false));
        assert!(rule.resolve_query.is_none());
        assert!(rule.last_error.is_none());
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let engine = Arc::new(MockEngine::new());
        let store = RuleStore::new(engine);
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, RuleError::NotFound(_)));
    }

    #[tokio::test]
    async fn queries_use_the_latest_version_window() {
        let engine = Arc::new(MockEngine::new());
        let store = RuleStore::new(engine.clone());
        let _ = store.list().await.unwrap();

        let executed = engine.executed();
        let query = &executed[0];
        assert!(query.contains("row_number() OVER (PARTITION BY id ORDER BY _tp_time DESC)"));
        assert!(query.contains("FROM table(tp_rules)"));
        assert!(query.contains("WHERE active = true"));
        assert!(query.contains("WHERE row_num = 1"));
    }

    #[tokio::test]
    async fn soft_delete_rewrites_inactive_stopped() {
        let engine = Arc::new(MockEngine::new());
        let store = RuleStore::new(engine.clone());
        let mut rule = sample_rule();
        rule.status = RuleStatus::Running;
        store.soft_delete(&mut rule).await.unwrap();

        assert_eq!(rule.status, RuleStatus::Stopped);
        let insert = &engine.inserted()[0];
        assert_eq!(insert.values[5], SqlValue::Text("stopped".to_string()));
        assert_eq!(insert.values[18], SqlValue::Bool(false));
    }
}
