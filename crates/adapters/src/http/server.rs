use std::future::Future;
use std::sync::Arc;

use super::router::build_router;
use super::state::AppState;

/// Run the REST API server until `shutdown` resolves, then drain in-flight
/// connections before returning.
pub async fn run_http_server(
    state: Arc<AppState>,
    port: u16,
    allowed_origins: &[String],
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = build_router(state, allowed_origins);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "HTTP API server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
