//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::config::Config;
use crate::deploy::{CommandExecutor, Dispatcher};
use crate::errors::AppError;
use crate::notify::Notifier;
use crate::store::{DeployStore, SqliteDeployStore};

/// Main application state
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<Config>,

    /// Deploy record storage
    pub store: Arc<dyn DeployStore>,

    /// Outbound notifications
    pub notifier: Arc<Notifier>,

    /// Background deployment runner
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(config: Arc<Config>, options: &AppOptions) -> Result<Self, AppError> {
        info!("Initializing application state...");

        let store: Arc<dyn DeployStore> =
            Arc::new(SqliteDeployStore::open(&options.database_path).await?);
        info!("Deploy store ready at {}", options.database_path.display());

        let notifier = Arc::new(Notifier::from_config(&config.notification)?);

        let executor = Arc::new(CommandExecutor::new(
            store.clone(),
            options.executor.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            executor,
            store.clone(),
            notifier.clone(),
        ));

        Ok(Self {
            config,
            store,
            notifier,
            dispatcher,
        })
    }
}
