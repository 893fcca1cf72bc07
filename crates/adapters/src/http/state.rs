use std::sync::Arc;
use std::time::Instant;

use application::alert_service::AlertService;
use application::rule_service::RuleService;
use ports::secondary::engine_port::EnginePort;

/// Shared application state for the REST API server.
///
/// Passed to axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub engine: Arc<dyn EnginePort>,
    pub rule_service: Arc<RuleService>,
    pub alert_service: Arc<AlertService>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn EnginePort>,
        rule_service: Arc<RuleService>,
        alert_service: Arc<AlertService>,
    ) -> Self {
        Self {
            engine,
            rule_service,
            alert_service,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
