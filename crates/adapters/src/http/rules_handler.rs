use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use domain::rule::entity::{CreateRule, Rule, RulePatch, Severity};

use super::alerts_handler::AlertResponse;
use super::error::{ApiError, ErrorBody};
use super::state::AppState;

// ── Request DTOs ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// SQL predicate over the source streams.
    #[serde(default)]
    pub query: String,
    /// Optional predicate that auto-resolves matching alerts.
    #[serde(default)]
    pub resolve_query: Option<String>,
    /// `info`, `warning`, or `critical`.
    #[serde(default = "default_severity")]
    pub severity: String,
    /// Minimum minutes between two active transitions per entity.
    /// 0 retriggers on every event; negative fires only once per entity.
    #[serde(default)]
    pub throttle_minutes: i32,
    /// Comma-separated columns to derive the entity id from.
    #[serde(default)]
    pub entity_id_columns: String,
    #[serde(default)]
    pub dedicated_alert_acks_stream: Option<bool>,
    #[serde(default)]
    pub alert_acks_stream_name: Option<String>,
}

fn default_severity() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuleBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub resolve_query: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub throttle_minutes: Option<i32>,
    #[serde(default)]
    pub entity_id_columns: Option<String>,
    #[serde(default)]
    pub dedicated_alert_acks_stream: Option<bool>,
    #[serde(default)]
    pub alert_acks_stream_name: Option<String>,
}

// ── Response DTOs ───────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_query: Option<String>,
    pub status: String,
    pub severity: String,
    pub throttle_minutes: i32,
    pub entity_id_columns: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedicated_alert_acks_stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_acks_stream_name: Option<String>,
    pub result_stream: String,
    pub view_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_view_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<Rule> for RuleResponse {
    fn from(rule: Rule) -> Self {
        Self {
            id: rule.id,
            name: rule.name,
            description: rule.description,
            query: rule.query,
            resolve_query: rule.resolve_query,
            status: rule.status.to_string(),
            severity: rule.severity.to_string(),
            throttle_minutes: rule.throttle_minutes,
            entity_id_columns: rule.entity_id_columns,
            created_at: rule.created_at,
            updated_at: rule.updated_at,
            last_triggered_at: rule.last_triggered_at,
            dedicated_alert_acks_stream: rule.dedicated_alert_acks_stream,
            alert_acks_stream_name: rule.alert_acks_stream_name,
            result_stream: rule.result_stream,
            view_name: rule.view_name,
            resolve_view_name: rule.resolve_view_name,
            last_error: rule.last_error,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

fn parse_severity(value: &str) -> Result<Severity, ApiError> {
    value.parse().map_err(|_| ApiError::BadRequest {
        code: "INVALID_SEVERITY",
        message: format!("invalid severity '{value}', expected info, warning, or critical"),
    })
}

// ── Handlers ────────────────────────────────────────────────────────

/// `GET /api/rules` — list all active rules.
#[utoipa::path(
    get, path = "/api/rules",
    tag = "Rules",
    responses(
        (status = 200, description = "All active rules", body = Vec<RuleResponse>),
        (status = 500, description = "Engine failure", body = ErrorBody),
    )
)]
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RuleResponse>>, ApiError> {
    let rules = state.rule_service.list_rules().await?;
    Ok(Json(rules.into_iter().map(RuleResponse::from).collect()))
}

/// `GET /api/rules/{id}` — fetch one rule.
#[utoipa::path(
    get, path = "/api/rules/{id}",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "The rule", body = RuleResponse),
        (status = 404, description = "Rule not found", body = ErrorBody),
    )
)]
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RuleResponse>, ApiError> {
    let rule = state.rule_service.get_rule(&id).await?;
    Ok(Json(RuleResponse::from(rule)))
}

/// `POST /api/rules` — create a rule and schedule its start.
#[utoipa::path(
    post, path = "/api/rules",
    tag = "Rules",
    request_body = CreateRuleBody,
    responses(
        (status = 201, description = "Rule created", body = RuleResponse),
        (status = 400, description = "Invalid rule", body = ErrorBody),
    )
)]
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRuleBody>,
) -> Result<(StatusCode, Json<RuleResponse>), ApiError> {
    let severity = parse_severity(&body.severity)?;
    let rule = state
        .rule_service
        .create_rule(CreateRule {
            name: body.name,
            description: body.description,
            query: body.query,
            resolve_query: body.resolve_query,
            severity,
            throttle_minutes: body.throttle_minutes,
            entity_id_columns: body.entity_id_columns,
            dedicated_alert_acks_stream: body.dedicated_alert_acks_stream,
            alert_acks_stream_name: body.alert_acks_stream_name,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(RuleResponse::from(rule))))
}

/// `PUT /api/rules/{id}` — patch a rule; only while `created` or `stopped`.
#[utoipa::path(
    put, path = "/api/rules/{id}",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    request_body = UpdateRuleBody,
    responses(
        (status = 200, description = "Updated rule", body = RuleResponse),
        (status = 400, description = "Invalid patch or rule state", body = ErrorBody),
        (status = 404, description = "Rule not found", body = ErrorBody),
    )
)]
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateRuleBody>,
) -> Result<Json<RuleResponse>, ApiError> {
    let severity = match body.severity.as_deref() {
        Some(value) => Some(parse_severity(value)?),
        None => None,
    };
    let rule = state
        .rule_service
        .update_rule(
            &id,
            RulePatch {
                name: body.name,
                description: body.description,
                query: body.query,
                resolve_query: body.resolve_query,
                severity,
                throttle_minutes: body.throttle_minutes,
                entity_id_columns: body.entity_id_columns,
                dedicated_alert_acks_stream: body.dedicated_alert_acks_stream,
                alert_acks_stream_name: body.alert_acks_stream_name,
            },
        )
        .await?;
    Ok(Json(RuleResponse::from(rule)))
}

/// `DELETE /api/rules/{id}` — stop, drop artifacts, soft-delete.
#[utoipa::path(
    delete, path = "/api/rules/{id}",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule deleted", body = MessageResponse),
        (status = 404, description = "Rule not found", body = ErrorBody),
    )
)]
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.rule_service.delete_rule(&id).await?;
    Ok(Json(MessageResponse::new("Rule deleted successfully")))
}

/// `POST /api/rules/{id}/start` — run the rule's DDL plan.
#[utoipa::path(
    post, path = "/api/rules/{id}/start",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule started", body = MessageResponse),
        (status = 404, description = "Rule not found", body = ErrorBody),
        (status = 500, description = "Compilation failed", body = ErrorBody),
    )
)]
pub async fn start_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.rule_service.start_rule(&id).await?;
    Ok(Json(MessageResponse::new("Rule started successfully")))
}

/// `POST /api/rules/{id}/stop` — drop the rule's views.
#[utoipa::path(
    post, path = "/api/rules/{id}/stop",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule stopped", body = MessageResponse),
        (status = 400, description = "Rule is not running", body = ErrorBody),
        (status = 404, description = "Rule not found", body = ErrorBody),
    )
)]
pub async fn stop_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.rule_service.stop_rule(&id).await?;
    Ok(Json(MessageResponse::new("Rule stopped successfully")))
}

/// `GET /api/rules/{id}/alerts` — alerts raised by one rule.
#[utoipa::path(
    get, path = "/api/rules/{id}/alerts",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Alerts for the rule", body = Vec<AlertResponse>),
        (status = 500, description = "Engine failure", body = ErrorBody),
    )
)]
pub async fn rule_alerts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AlertResponse>>, ApiError> {
    let alerts = state.alert_service.list_alerts(Some(&id)).await?;
    Ok(Json(alerts.into_iter().map(AlertResponse::from).collect()))
}
