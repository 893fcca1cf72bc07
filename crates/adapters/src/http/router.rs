use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, AllowOrigin, CorsLayer};

use super::alerts_handler::{
    acknowledge_alert, alert_data, alerts_by_time, get_alert, list_alerts,
};
use super::health_handler::{healthz, readyz};
use super::openapi::ApiDoc;
use super::rules_handler::{
    create_rule, delete_rule, get_rule, list_rules, rule_alerts, start_rule, stop_rule,
    update_rule,
};
use super::state::AppState;
use utoipa::OpenApi;

/// Maximum request body size for API endpoints (64 KiB).
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Build the axum router with all REST API routes.
pub fn build_router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );

    let api_routes = Router::new()
        .route("/api/rules", get(list_rules).post(create_rule))
        .route(
            "/api/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/api/rules/{id}/start", post(start_rule))
        .route("/api/rules/{id}/stop", post(stop_rule))
        .route("/api/rules/{id}/alerts", get(rule_alerts))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/by-time", get(alerts_by_time))
        .route("/api/alerts/{id}", get(get_alert))
        .route("/api/alerts/{id}/data", get(alert_data))
        .route("/api/alerts/{id}/acknowledge", post(acknowledge_alert))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

    public_routes
        .merge(api_routes)
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// `*` opens the API to any origin; otherwise only the listed origins are
/// allowed (entries that are not valid header values are skipped).
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
