use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use adapters::engine::{EngineOptions, HttpEngineClient};
use adapters::http::server::run_http_server;
use adapters::http::state::AppState;
use application::alert_service::AlertService;
use application::rule_service::RuleService;
use infrastructure::config::GatewayConfig;
use ports::secondary::engine_port::EnginePort;

use crate::shutdown;

/// Wire the gateway together and serve until a shutdown signal arrives:
/// engine connection, catalog bootstrap, recovery of running rules, then
/// the HTTP API.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let sanitized = config.sanitized();
    tracing::info!(
        port = config.server.port,
        engine = %sanitized.engine.address,
        workspace = %sanitized.engine.workspace,
        "alert gateway starting"
    );

    let options = EngineOptions::new(
        &config.engine.address,
        &config.engine.username,
        &config.engine.password,
        &config.engine.workspace,
    );
    let engine: Arc<dyn EnginePort> = Arc::new(
        HttpEngineClient::connect(options)
            .await
            .context("engine connection failed")?,
    );

    let rule_service = Arc::new(RuleService::new(Arc::clone(&engine)));
    let alert_service = Arc::new(AlertService::new(Arc::clone(&engine)));

    rule_service
        .bootstrap()
        .await
        .context("catalog bootstrap failed")?;
    rule_service.resume_running_rules().await;

    let state = Arc::new(AppState::new(engine, rule_service, alert_service));

    let token = shutdown::create_shutdown_token();
    let shutdown_signal = {
        let token = token.clone();
        async move { token.cancelled().await }
    };

    let allowed_origins = config.allowed_origins();
    let serve = run_http_server(
        state,
        config.server.port,
        &allowed_origins,
        shutdown_signal,
    );
    tokio::pin!(serve);

    let grace = Duration::from_secs(config.server.shutdown_timeout);
    tokio::select! {
        result = &mut serve => {
            result.context("HTTP server failed")?;
        }
        () = async { token.cancelled().await; tokio::time::sleep(grace).await; } => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "shutdown grace period expired, abandoning in-flight requests"
            );
        }
    }

    tracing::info!("alert gateway stopped");
    Ok(())
}
