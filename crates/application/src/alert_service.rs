//! Read path over the acknowledgment stream: project ack rows into logical
//! alerts, enrich them with rule metadata, and record operator
//! acknowledgments (a primary-key upsert on the target stream).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use domain::alert::entity::{Alert, AlertId, AlertState};
use domain::alert::error::AlertError;
use domain::engine::entity::{self as rows, Row, SqlValue};
use domain::rule::entity::{Rule, Severity};
use domain::schema::{catalog, sql};
use ports::secondary::engine_port::EnginePort;

use crate::rule_store::RuleStore;

/// Cap on rows returned by the listing queries.
const LIST_LIMIT: usize = 1000;

const ACK_COLUMNS: &str = "rule_id, entity_id, state, created_at, updated_at, updated_by, comment";

pub struct AlertService {
    engine: Arc<dyn EnginePort>,
    rules: RuleStore,
}

impl AlertService {
    pub fn new(engine: Arc<dyn EnginePort>) -> Self {
        Self {
            rules: RuleStore::new(Arc::clone(&engine)),
            engine,
        }
    }

    /// Most recent alerts, newest episode first. With a rule id the query
    /// targets that rule's acknowledgment stream (which may be dedicated);
    /// without one it covers the shared global stream.
    pub async fn list_alerts(&self, rule_id: Option<&str>) -> Result<Vec<Alert>, AlertError> {
        let stream = self.stream_for(rule_id).await;
        let mut conditions = Vec::new();
        if let Some(id) = rule_id {
            conditions.push(format!("rule_id = {}", sql::quote(id)));
        }
        let rows = self.engine.query(&list_sql(&stream, &conditions)).await?;
        Ok(self.project(rows).await)
    }

    /// Alerts whose episode start falls inside `[start, end]`.
    pub async fn list_alerts_by_time_range(
        &self,
        rule_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Alert>, AlertError> {
        let stream = self.stream_for(rule_id).await;
        let mut conditions = Vec::new();
        if let Some(id) = rule_id {
            conditions.push(format!("rule_id = {}", sql::quote(id)));
        }
        conditions.push(format!(
            "created_at >= '{}'",
            start.format("%Y-%m-%d %H:%M:%S%.3f")
        ));
        conditions.push(format!(
            "created_at <= '{}'",
            end.format("%Y-%m-%d %H:%M:%S%.3f")
        ));
        let rows = self.engine.query(&list_sql(&stream, &conditions)).await?;
        Ok(self.project(rows).await)
    }

    /// Latest state for one composite id.
    pub async fn get_alert(&self, id: &str) -> Result<Alert, AlertError> {
        let key = AlertId::parse(id)?;
        let rule = self.rules.get(&key.rule_id).await.ok();
        let stream = rule
            .as_ref()
            .map(Rule::acks_stream)
            .unwrap_or_else(|| catalog::ALERT_ACKS_STREAM.to_string());

        let query = format!(
            "SELECT {ACK_COLUMNS} FROM table({stream}) \
             WHERE rule_id = {} AND entity_id = {} \
             ORDER BY updated_at DESC LIMIT 1",
            sql::quote(&key.rule_id),
            sql::quote(&key.entity_id),
        );
        let result = self.engine.query(&query).await?;
        let row = result
            .first()
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;
        Ok(project_row(row, rule.as_ref()))
    }

    /// Record an operator acknowledgment. Requires a live `active` row; the
    /// insert replaces it via the primary key on `(rule_id, entity_id)`.
    pub async fn acknowledge(
        &self,
        id: &str,
        acknowledged_by: &str,
        comment: &str,
    ) -> Result<(), AlertError> {
        let key = AlertId::parse(id)?;
        let rule = self.rules.get(&key.rule_id).await.ok();
        let stream = rule
            .as_ref()
            .map(Rule::acks_stream)
            .unwrap_or_else(|| catalog::ALERT_ACKS_STREAM.to_string());

        let active = self
            .engine
            .query(&format!(
                "SELECT rule_id FROM table({stream}) \
                 WHERE rule_id = {} AND entity_id = {} AND state = '{}'",
                sql::quote(&key.rule_id),
                sql::quote(&key.entity_id),
                AlertState::Active,
            ))
            .await?;
        if active.is_empty() {
            return Err(AlertError::NoActiveAlert {
                rule_id: key.rule_id,
                entity_id: key.entity_id,
            });
        }

        let comment = if comment.is_empty() {
            "Acknowledged via API"
        } else {
            comment
        };
        let now = Utc::now();
        self.engine
            .insert(
                &stream,
                &[
                    "rule_id",
                    "entity_id",
                    "state",
                    "created_at",
                    "updated_at",
                    "updated_by",
                    "comment",
                ],
                &[
                    SqlValue::from(key.rule_id.clone()),
                    SqlValue::from(key.entity_id.clone()),
                    SqlValue::from(AlertState::Acknowledged.as_str()),
                    SqlValue::from(now),
                    SqlValue::from(now),
                    SqlValue::from(acknowledged_by),
                    SqlValue::from(comment),
                ],
            )
            .await?;
        tracing::info!(
            rule_id = %key.rule_id,
            entity_id = %key.entity_id,
            acknowledged_by = %acknowledged_by,
            "alert acknowledged"
        );
        Ok(())
    }

    async fn stream_for(&self, rule_id: Option<&str>) -> String {
        if let Some(id) = rule_id {
            if let Ok(rule) = self.rules.get(id).await {
                return rule.acks_stream();
            }
        }
        catalog::ALERT_ACKS_STREAM.to_string()
    }

    /// Enrich rows with rule display metadata; one lookup per distinct rule.
    async fn project(&self, result: Vec<Row>) -> Vec<Alert> {
        let rule_ids: BTreeSet<String> = result
            .iter()
            .map(|row| rows::get_string(row, "rule_id"))
            .filter(|id| !id.is_empty())
            .collect();

        let mut details: HashMap<String, Rule> = HashMap::new();
        for id in rule_ids {
            if let Ok(rule) = self.rules.get(&id).await {
                details.insert(id, rule);
            }
        }

        result
            .iter()
            .map(|row| {
                let rule_id = rows::get_string(row, "rule_id");
                project_row(row, details.get(&rule_id))
            })
            .collect()
    }
}

fn list_sql(stream: &str, conditions: &[String]) -> String {
    let mut query = format!("SELECT {ACK_COLUMNS} FROM table({stream})");
    if !conditions.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&conditions.join(" AND "));
    }
    query.push_str(&format!(" ORDER BY created_at DESC LIMIT {LIST_LIMIT}"));
    query
}

fn project_row(row: &Row, rule: Option<&Rule>) -> Alert {
    let rule_id = rows::get_string(row, "rule_id");
    let entity_id = rows::get_string(row, "entity_id");
    let state = rows::get_string(row, "state");
    let acknowledged = state != AlertState::Active.as_str();
    let (rule_name, severity) = match rule {
        Some(r) => (r.name.clone(), r.severity),
        None => ("Unknown Rule".to_string(), Severity::Info),
    };

    Alert {
        id: format!("{rule_id}:{entity_id}"),
        rule_id,
        rule_name,
        severity,
        triggered_at: rows::get_datetime(row, "created_at").unwrap_or_default(),
        data: format!(r#"{{"entity_id":"{entity_id}","state":"{state}"}}"#),
        acknowledged,
        acknowledged_at: if acknowledged {
            rows::get_datetime(row, "updated_at")
        } else {
            None
        },
        acknowledged_by: rows::get_string(row, "updated_by"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ports::test_utils::{row, MockEngine};
    use serde_json::json;

    fn ack_row(rule_id: &str, entity_id: &str, state: &str) -> Row {
        row(&[
            ("rule_id", json!(rule_id)),
            ("entity_id", json!(entity_id)),
            ("state", json!(state)),
            ("created_at", json!("2025-06-01 10:00:00.000")),
            ("updated_at", json!("2025-06-01 10:05:00.000")),
            ("updated_by", json!(if state == "active" { "" } else { "op" })),
            ("comment", json!("{}")),
        ])
    }

    fn rule_row(id: &str, name: &str) -> Row {
        row(&[
            ("id", json!(id)),
            ("name", json!(name)),
            ("description", json!("")),
            ("query", json!("SELECT 1")),
            ("resolve_query", json!(null)),
            ("status", json!("running")),
            ("severity", json!("critical")),
            ("throttle_minutes", json!(1)),
            ("entity_id_columns", json!("")),
            ("created_at", json!("2025-06-01 09:00:00.000")),
            ("updated_at", json!("2025-06-01 09:00:00.000")),
            ("last_triggered_at", json!(null)),
            ("result_stream", json!("rs")),
            ("view_name", json!("v")),
            ("resolve_view_name", json!(null)),
            ("last_error", json!(null)),
            ("dedicated_alert_acks_stream", json!(false)),
            ("alert_acks_stream_name", json!(null)),
        ])
    }

    #[tokio::test]
    async fn list_projects_rows_with_rule_metadata() {
        let engine = Arc::new(MockEngine::new());
        engine.on_query(
            "FROM table(tp_alert_acks_mutable)",
            vec![
                ack_row("r-1", "device_1", "active"),
                ack_row("r-1", "device_2", "acknowledged"),
            ],
        );
        engine.on_query("AND id = 'r-1'", vec![rule_row("r-1", "temp high")]);

        let svc = AlertService::new(engine.clone());
        let alerts = svc.list_alerts(None).await.unwrap();
        assert_eq!(alerts.len(), 2);

        let active = &alerts[0];
        assert_eq!(active.id, "r-1:device_1");
        assert_eq!(active.rule_name, "temp high");
        assert_eq!(active.severity, Severity::Critical);
        assert!(!active.acknowledged);
        assert!(active.acknowledged_at.is_none());
        assert_eq!(active.data, r#"{"entity_id":"device_1","state":"active"}"#);

        let acked = &alerts[1];
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by, "op");
        assert!(acked.acknowledged_at.is_some());
    }

    #[tokio::test]
    async fn unknown_rules_fall_back_to_placeholder_metadata() {
        let engine = Arc::new(MockEngine::new());
        engine.on_query(
            "FROM table(tp_alert_acks_mutable)",
            vec![ack_row("ghost", "e1", "active")],
        );
        let svc = AlertService::new(engine);
        let alerts = svc.list_alerts(None).await.unwrap();
        assert_eq!(alerts[0].rule_name, "Unknown Rule");
        assert_eq!(alerts[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn list_queries_are_bounded_and_ordered() {
        let engine = Arc::new(MockEngine::new());
        let svc = AlertService::new(engine.clone());
        let _ = svc.list_alerts(None).await.unwrap();
        let query = &engine.executed()[0];
        assert!(query.contains("ORDER BY created_at DESC"));
        assert!(query.contains("LIMIT 1000"));
    }

    #[tokio::test]
    async fn per_rule_listing_targets_the_rule_stream() {
        let engine = Arc::new(MockEngine::new());
        let mut dedicated = rule_row("r-9", "dedicated rule");
        dedicated.insert("dedicated_alert_acks_stream".to_string(), json!(true));
        engine.on_query("AND id = 'r-9'", vec![dedicated]);
        let svc = AlertService::new(engine.clone());
        let _ = svc.list_alerts(Some("r-9")).await.unwrap();

        let listing = engine
            .executed()
            .into_iter()
            .find(|s| s.contains("ORDER BY created_at DESC"))
            .unwrap();
        assert!(listing.contains("FROM table(rule_r_9_alert_acks)"));
        assert!(listing.contains("rule_id = 'r-9'"));
    }

    #[tokio::test]
    async fn time_range_constrains_created_at() {
        let engine = Arc::new(MockEngine::new());
        let svc = AlertService::new(engine.clone());
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let _ = svc
            .list_alerts_by_time_range(Some("r-1"), start, end)
            .await
            .unwrap();

        let query = engine
            .executed()
            .into_iter()
            .find(|s| s.contains("created_at >="))
            .unwrap();
        assert!(query.contains("rule_id = 'r-1'"));
        assert!(query.contains("created_at >= '2025-06-01 00:00:00.000'"));
        assert!(query.contains("created_at <= '2025-06-02 00:00:00.000'"));
    }

    #[tokio::test]
    async fn get_alert_parses_composite_id() {
        let engine = Arc::new(MockEngine::new());
        engine.on_query("entity_id = 'device_1'", vec![ack_row("r-1", "device_1", "active")]);
        let svc = AlertService::new(engine.clone());
        let alert = svc.get_alert("r-1:device_1").await.unwrap();
        assert_eq!(alert.id, "r-1:device_1");

        let query = engine
            .executed()
            .into_iter()
            .find(|s| s.contains("ORDER BY updated_at DESC LIMIT 1"))
            .unwrap();
        assert!(query.contains("rule_id = 'r-1'"));

        assert!(matches!(
            svc.get_alert("malformed").await.unwrap_err(),
            AlertError::InvalidId(_)
        ));
        assert!(matches!(
            svc.get_alert("r-1:absent").await.unwrap_err(),
            AlertError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn acknowledge_requires_an_active_row() {
        let engine = Arc::new(MockEngine::new());
        let svc = AlertService::new(engine.clone());
        let err = svc.acknowledge("r-1:device_1", "op", "").await.unwrap_err();
        assert!(matches!(err, AlertError::NoActiveAlert { .. }));
        assert!(engine.inserted().is_empty());
    }

    #[tokio::test]
    async fn acknowledge_upserts_the_acknowledged_row() {
        let engine = Arc::new(MockEngine::new());
        engine.on_query("state = 'active'", vec![ack_row("r-1", "device_1", "active")]);
        let svc = AlertService::new(engine.clone());
        svc.acknowledge("r-1:device_1", "op", "").await.unwrap();

        let insert = &engine.inserted()[0];
        assert_eq!(insert.stream, "tp_alert_acks_mutable");
        assert_eq!(insert.values[0], SqlValue::Text("r-1".to_string()));
        assert_eq!(insert.values[1], SqlValue::Text("device_1".to_string()));
        assert_eq!(insert.values[2], SqlValue::Text("acknowledged".to_string()));
        assert_eq!(insert.values[5], SqlValue::Text("op".to_string()));
        assert_eq!(
            insert.values[6],
            SqlValue::Text("Acknowledged via API".to_string())
        );
    }
}
