//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::ClawError;
use crate::server::serve::serve;

/// Run the control service until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ClawError> {
    info!("Initializing clawctl...");
    options.layout.setup().await?;

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let state = match AppState::init(&options).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start clawctl: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    let server = init_socket_server(
        &options,
        state,
        &mut shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await;
    if let Err(e) = server {
        error!("Failed to start the HTTP server: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

async fn init_socket_server(
    options: &AppOptions,
    state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ClawError> {
    info!("Initializing HTTP control server...");

    let server_handle = serve(&options.server, state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    socket_server_handle: Option<JoinHandle<Result<(), ClawError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            socket_server_handle: None,
        }
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ClawError>>,
    ) -> Result<(), ClawError> {
        if self.socket_server_handle.is_some() {
            return Err(ClawError::Internal("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ClawError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ClawError> {
        info!("Shutting down clawctl...");

        // in-flight provisioning runs are dropped with the server task
        if let Some(handle) = self.socket_server_handle.take() {
            handle
                .await
                .map_err(|e| ClawError::ServerError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
