use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use domain::alert::entity::Alert;

use super::error::{ApiError, ErrorBody};
use super::rules_handler::MessageResponse;
use super::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    /// Composite id `<rule_id>:<entity_id>`.
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: String,
    pub triggered_at: DateTime<Utc>,
    /// JSON string describing the alert key and state.
    pub data: String,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: String,
}

impl From<Alert> for AlertResponse {
    fn from(alert: Alert) -> Self {
        Self {
            id: alert.id,
            rule_id: alert.rule_id,
            rule_name: alert.rule_name,
            severity: alert.severity.to_string(),
            triggered_at: alert.triggered_at,
            data: alert.data,
            acknowledged: alert.acknowledged,
            acknowledged_at: alert.acknowledged_at,
            acknowledged_by: alert.acknowledged_by,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListAlertsParams {
    /// Restrict to one rule.
    pub rule_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TimeRangeParams {
    /// Restrict to one rule.
    pub rule_id: Option<String>,
    /// RFC3339 lower bound; defaults to 24 hours ago.
    pub start_time: Option<String>,
    /// RFC3339 upper bound; defaults to now.
    pub end_time: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeBody {
    #[serde(default)]
    pub acknowledged_by: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertDataResponse {
    pub alert_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub triggered_at: DateTime<Utc>,
    pub raw_data: String,
    #[schema(value_type = Object)]
    pub parsed_data: serde_json::Value,
}

fn parse_rfc3339(value: &str, field: &'static str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest {
            code: "INVALID_TIME_FORMAT",
            message: format!("invalid {field} '{value}', expected RFC3339"),
        })
}

// ── Handlers ────────────────────────────────────────────────────────

/// `GET /api/alerts` — most recent alerts, optionally for one rule.
#[utoipa::path(
    get, path = "/api/alerts",
    tag = "Alerts",
    params(ListAlertsParams),
    responses(
        (status = 200, description = "Alerts, newest first", body = Vec<AlertResponse>),
        (status = 500, description = "Engine failure", body = ErrorBody),
    )
)]
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListAlertsParams>,
) -> Result<Json<Vec<AlertResponse>>, ApiError> {
    let alerts = state
        .alert_service
        .list_alerts(params.rule_id.as_deref())
        .await?;
    Ok(Json(alerts.into_iter().map(AlertResponse::from).collect()))
}

/// `GET /api/alerts/by-time` — alerts whose episode started in the range.
#[utoipa::path(
    get, path = "/api/alerts/by-time",
    tag = "Alerts",
    params(TimeRangeParams),
    responses(
        (status = 200, description = "Alerts in the range", body = Vec<AlertResponse>),
        (status = 400, description = "Invalid time format", body = ErrorBody),
    )
)]
pub async fn alerts_by_time(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TimeRangeParams>,
) -> Result<Json<Vec<AlertResponse>>, ApiError> {
    let end = match params.end_time.as_deref() {
        Some(value) => parse_rfc3339(value, "end_time")?,
        None => Utc::now(),
    };
    let start = match params.start_time.as_deref() {
        Some(value) => parse_rfc3339(value, "start_time")?,
        None => end - Duration::hours(24),
    };
    let alerts = state
        .alert_service
        .list_alerts_by_time_range(params.rule_id.as_deref(), start, end)
        .await?;
    Ok(Json(alerts.into_iter().map(AlertResponse::from).collect()))
}

/// `GET /api/alerts/{id}` — latest state for one alert.
#[utoipa::path(
    get, path = "/api/alerts/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id (`rule_id:entity_id`)")),
    responses(
        (status = 200, description = "The alert", body = AlertResponse),
        (status = 400, description = "Malformed alert id", body = ErrorBody),
        (status = 404, description = "Alert not found", body = ErrorBody),
    )
)]
pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertResponse>, ApiError> {
    let alert = state.alert_service.get_alert(&id).await?;
    Ok(Json(AlertResponse::from(alert)))
}

/// `GET /api/alerts/{id}/data` — the alert's `data` field, parsed.
#[utoipa::path(
    get, path = "/api/alerts/{id}/data",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id (`rule_id:entity_id`)")),
    responses(
        (status = 200, description = "Raw and parsed alert data", body = AlertDataResponse),
        (status = 404, description = "Alert not found", body = ErrorBody),
    )
)]
pub async fn alert_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertDataResponse>, ApiError> {
    let alert = state.alert_service.get_alert(&id).await?;
    let parsed_data: serde_json::Value =
        serde_json::from_str(&alert.data).map_err(|e| ApiError::Internal {
            message: format!("failed to parse alert data: {e}"),
        })?;
    Ok(Json(AlertDataResponse {
        alert_id: alert.id,
        rule_id: alert.rule_id,
        rule_name: alert.rule_name,
        triggered_at: alert.triggered_at,
        raw_data: alert.data,
        parsed_data,
    }))
}

/// `POST /api/alerts/{id}/acknowledge` — record an operator acknowledgment.
#[utoipa::path(
    post, path = "/api/alerts/{id}/acknowledge",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id (`rule_id:entity_id`)")),
    request_body = AcknowledgeBody,
    responses(
        (status = 200, description = "Alert acknowledged", body = MessageResponse),
        (status = 400, description = "Malformed alert id", body = ErrorBody),
        (status = 404, description = "No active alert for the id", body = ErrorBody),
    )
)]
pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AcknowledgeBody>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .alert_service
        .acknowledge(&id, &body.acknowledged_by, "")
        .await?;
    Ok(Json(MessageResponse::new("Alert acknowledged successfully")))
}
