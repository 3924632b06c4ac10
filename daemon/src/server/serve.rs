//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AppError;
use crate::server::handlers::{deploys_handler, health_handler, version_handler, webhook_handler};
use crate::server::state::ServerState;

/// Build the router. Webhook and history paths come from configuration.
pub fn router(state: Arc<ServerState>) -> Router {
    let webhook_path = state.config.webhook.path.clone();
    let deploys_path = state.config.server.deploys_path.clone();

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route(&webhook_path, post(webhook_handler))
        .route(&deploys_path, get(deploys_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AppError>>, AppError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::ServerError(format!("cannot bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AppError::ServerError(e.to_string()))
    });

    Ok(handle)
}
