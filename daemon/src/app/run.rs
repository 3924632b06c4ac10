//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::config::Config;
use crate::deploy::Dispatcher;
use crate::errors::AppError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the daemon until `shutdown_signal` resolves
pub async fn run(
    config: Config,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    info!("Initializing pushdeploy...");

    let options = AppOptions::from_config(&config);
    let config = Arc::new(config);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(config, &options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start pushdeploy: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    config: Arc<Config>,
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AppError> {
    let app_state = AppState::init(config, options).await?;
    shutdown_manager.with_dispatcher(app_state.dispatcher.clone())?;

    for spec in &app_state.config.deployments {
        info!(
            "Watching {} ({}) -> {} [{} command(s)]",
            spec.repository,
            spec.git_ref(),
            spec.work_dir.display(),
            spec.commands.len()
        );
    }

    init_server(options, &app_state, shutdown_manager, shutdown_tx.subscribe()).await
}

async fn init_server(
    options: &AppOptions,
    app_state: &AppState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AppError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(
        app_state.config.clone(),
        app_state.store.clone(),
        app_state.dispatcher.clone(),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), AppError>>>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(&mut self, dispatcher: Arc<Dispatcher>) -> Result<(), AppError> {
        if self.dispatcher.is_some() {
            return Err(AppError::ShutdownError("dispatcher already set".to_string()));
        }
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AppError>>,
    ) -> Result<(), AppError> {
        if self.server_handle.is_some() {
            return Err(AppError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    /// Stop the server, then drain deployments. Each step has its own budget.
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        info!("Shutting down pushdeploy...");
        let _ = self.shutdown_tx.send(());

        // 1. Stop accepting webhooks
        let server_result = self.stop_server().await;

        // 2. Let running deployments reach a terminal state
        let drain_result = match self.dispatcher.take() {
            Some(dispatcher) => dispatcher
                .drain(self.lifecycle_options.drain_timeout)
                .await
                .map(|drained| {
                    if drained > 0 {
                        info!("{} deployment(s) finished during shutdown", drained);
                    }
                }),
            None => Ok(()),
        };
        if let Err(e) = &drain_result {
            error!("Failed to drain deployments: {}", e);
        }

        server_result?;
        drain_result?;
        info!("Shutdown complete");
        Ok(())
    }

    async fn stop_server(&mut self) -> Result<(), AppError> {
        let Some(handle) = self.server_handle.take() else {
            return Ok(());
        };

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        let abort_handle = handle.abort_handle();
        match tokio::time::timeout(max_delay, handle).await {
            Ok(joined) => {
                let result = joined
                    .map_err(|e| AppError::ShutdownError(e.to_string()))
                    .and_then(|served| served);
                if let Err(e) = &result {
                    error!("HTTP server stopped with error: {}", e);
                }
                result
            }
            Err(_) => {
                error!("HTTP server did not stop within {:?}, aborting it", max_delay);
                abort_handle.abort();
                Err(AppError::ShutdownError(format!(
                    "server did not stop within {:?}",
                    max_delay
                )))
            }
        }
    }
}
