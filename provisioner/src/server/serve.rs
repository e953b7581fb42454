//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::app::state::AppState;
use crate::errors::ClawError;
use crate::server::handlers::{
    delete_handler, deploy_handler, deployments_handler, health_handler, logs_handler,
    missing_config_handler, secret_handler, status_handler, update_handler, version_handler,
    vm_handler,
};

/// The control surface routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Provisioning and lifecycle
        .route("/deploy", post(deploy_handler))
        .route("/update", post(update_handler))
        .route("/vm", post(vm_handler))
        .route("/delete", post(delete_handler))
        .route("/status", get(status_handler))
        .route("/logs", get(logs_handler))
        .route("/secrets", post(secret_handler))
        // Records
        .route("/deployments", get(deployments_handler))
        .route("/deployments/{id}/missing-config", get(missing_config_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<AppState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ClawError>>, ClawError> {
    let mut app = router(state);
    if options.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ClawError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ClawError::ServerError(e.to_string()))
    });

    Ok(handle)
}
