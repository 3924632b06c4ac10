//! Daemon configuration
//!
//! Loaded once at startup from a YAML file. Deployment specs are immutable
//! after load and shared behind an `Arc`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "PUSHDEPLOY_CONFIG";

/// Environment variable overriding `webhook.secret`
pub const WEBHOOK_SECRET_ENV: &str = "PUSHDEPLOY_WEBHOOK_SECRET";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Top-level configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Deployment specs, matched by repository
    #[serde(default)]
    pub deployments: Vec<DeploymentSpec>,

    #[serde(default, rename = "notifications")]
    pub notification: NotificationConfig,
}

impl Config {
    /// Load, apply environment overrides and validate
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let file = File::new(path.as_ref());
        let mut config: Config = file.read_yaml().await.map_err(|e| {
            AppError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.apply_env_overrides();
        config.validate()?;
        info!(
            "Loaded configuration from {} ({} deployment(s))",
            path.as_ref().display(),
            config.deployments.len()
        );
        Ok(config)
    }

    /// Parse from a YAML string without touching the environment
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AppError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(WEBHOOK_SECRET_ENV) {
            if !secret.is_empty() {
                self.webhook.secret = SecretString::from(secret);
            }
        }
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), AppError> {
        if self.webhook.secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError("webhook.secret must be set".into()));
        }
        for (key, path) in [
            ("webhook.path", &self.webhook.path),
            ("server.deploys_path", &self.server.deploys_path),
        ] {
            if !path.starts_with('/') {
                return Err(AppError::ConfigError(format!(
                    "{} must start with '/': {}",
                    key, path
                )));
            }
        }
        let reserved = ["/health", "/version", self.server.deploys_path.as_str()];
        if reserved.contains(&self.webhook.path.as_str()) {
            return Err(AppError::ConfigError(format!(
                "webhook.path collides with another route: {}",
                self.webhook.path
            )));
        }
        if reserved[..2].contains(&self.server.deploys_path.as_str()) {
            return Err(AppError::ConfigError(format!(
                "server.deploys_path collides with another route: {}",
                self.server.deploys_path
            )));
        }
        if self.execution.command_timeout_secs == 0 {
            return Err(AppError::ConfigError(
                "execution.command_timeout_secs must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.deployments {
            spec.validate()?;
            if !seen.insert(spec.repository.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "repository {} is configured more than once",
                    spec.repository
                )));
            }
        }

        self.notification.validate()
    }

    /// Find the deployment spec for a repository
    pub fn find_deployment(&self, repository: &str) -> Option<&DeploymentSpec> {
        self.deployments.iter().find(|d| d.repository == repository)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the deployment history endpoint
    #[serde(default = "default_deploys_path")]
    pub deploys_path: String,

    /// Upper bound on stopping the HTTP server at shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// How long running deployments may take to finish at shutdown
    /// before they are aborted
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3020
}

fn default_deploys_path() -> String {
    "/deploys".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_drain_timeout() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            deploys_path: default_deploys_path(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// Inbound webhook settings
#[derive(Debug, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret
    #[serde(default = "empty_secret")]
    pub secret: SecretString,

    #[serde(default = "default_webhook_path")]
    pub path: String,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: empty_secret(),
            path: default_webhook_path(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/deploys.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Optional log file in addition to stdout
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub json: bool,
}

/// Command execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-command wall clock limit
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    600
}

impl ExecutionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Which repository/branch triggers which command sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub name: String,

    /// Repository identifier, e.g. `owner/repo`
    pub repository: String,

    pub branch: String,

    pub work_dir: PathBuf,

    /// Run in order; each is split on whitespace, never passed to a shell
    #[serde(default)]
    pub commands: Vec<String>,
}

impl DeploymentSpec {
    /// Full ref a push must carry to trigger this spec
    pub fn git_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    pub fn matches_ref(&self, git_ref: &str) -> bool {
        git_ref
            .strip_prefix("refs/heads/")
            .is_some_and(|branch| branch == self.branch)
    }

    fn validate(&self) -> Result<(), AppError> {
        let missing = [
            ("name", self.name.trim().is_empty()),
            ("repository", self.repository.trim().is_empty()),
            ("branch", self.branch.trim().is_empty()),
            ("work_dir", self.work_dir.as_os_str().is_empty()),
        ]
        .into_iter()
        .find_map(|(field, empty)| empty.then_some(field));

        match missing {
            Some(field) => Err(AppError::ConfigError(format!(
                "deployment '{}' is missing {}",
                self.name, field
            ))),
            None => Ok(()),
        }
    }
}

/// Notification channels
#[derive(Debug, Default, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub webhook: ChatWebhookConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

impl NotificationConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.webhook.enabled {
            url::Url::parse(&self.webhook.url).map_err(|e| {
                AppError::ConfigError(format!("notifications.webhook.url is invalid: {}", e))
            })?;
        }
        if self.email.enabled {
            if self.email.smtp_host.is_empty() {
                return Err(AppError::ConfigError(
                    "notifications.email.smtp_host must be set".into(),
                ));
            }
            if self.email.to.is_empty() {
                return Err(AppError::ConfigError(
                    "notifications.email.to needs at least one recipient".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Team-chat incoming webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatWebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,
}

/// SMTP submission settings
#[derive(Debug, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default = "empty_secret")]
    pub password: SecretString,

    /// Sender address; defaults to `username`
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl EmailConfig {
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.username)
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: empty_secret(),
            from: None,
            to: Vec::new(),
        }
    }
}
