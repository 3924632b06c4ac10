//! Application run options, derived from the loaded configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::deploy::ExecutorOptions;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Command executor options
    pub executor: ExecutorOptions,
}

impl AppOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(config.server.shutdown_timeout_secs),
                drain_timeout: Duration::from_secs(config.server.drain_timeout_secs),
            },
            server: ServerOptions {
                host: config.server.host.clone(),
                port: config.server.port,
            },
            database_path: config.database.path.clone(),
            executor: ExecutorOptions {
                command_timeout: config.execution.command_timeout(),
            },
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for stopping the HTTP server
    pub max_shutdown_delay: Duration,

    /// Maximum wait for in-flight deployments before aborting them
    pub drain_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(120),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3020,
        }
    }
}
