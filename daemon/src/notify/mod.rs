//! Outbound deployment notifications
//!
//! Every channel is fire-and-forget from the deployment's point of view:
//! errors are logged per channel and never reach the caller.

pub mod chat;
pub mod email;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::config::{DeploymentSpec, NotificationConfig};
use crate::errors::AppError;
use crate::utils::short_commit;

pub use chat::ChatWebhookChannel;
pub use email::EmailChannel;

/// How a deployment ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// Everything a channel needs to describe one finished deployment
#[derive(Debug, Clone)]
pub struct DeployNotice {
    pub project: String,
    pub repository: String,
    pub branch: String,
    /// Full commit hash
    pub commit: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Local>,
}

impl DeployNotice {
    pub fn new(spec: &DeploymentSpec, commit: &str, outcome: Outcome) -> Self {
        Self {
            project: spec.name.clone(),
            repository: spec.repository.clone(),
            branch: spec.branch.clone(),
            commit: commit.to_string(),
            outcome,
            timestamp: Local::now(),
        }
    }

    pub fn short_commit(&self) -> &str {
        short_commit(&self.commit)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// One-line summary, e.g. "Deployment failed: site"
    pub fn summary(&self) -> String {
        if self.is_success() {
            format!("Deployment succeeded: {}", self.project)
        } else {
            format!("Deployment failed: {}", self.project)
        }
    }
}

/// A single notification transport
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name used in logs
    fn name(&self) -> &'static str;

    /// Announce a finished deployment
    async fn send(&self, notice: &DeployNotice) -> Result<(), AppError>;

    /// Send a test message to confirm the channel works
    async fn send_test(&self) -> Result<(), AppError>;
}

/// Receiver of deployment outcomes
#[async_trait]
pub trait DeployNotifier: Send + Sync {
    async fn notify_success(&self, spec: &DeploymentSpec, commit: &str);

    async fn notify_failure(&self, spec: &DeploymentSpec, commit: &str, error: &str);
}

/// Fans a notice out to every enabled channel
pub struct Notifier {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl Notifier {
    /// Create a notifier from explicit channels
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Build the enabled channels from configuration
    pub fn from_config(config: &NotificationConfig) -> Result<Self, AppError> {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

        if config.webhook.enabled && !config.webhook.url.is_empty() {
            channels.push(Box::new(ChatWebhookChannel::new(&config.webhook.url)?));
        }
        if config.email.enabled {
            channels.push(Box::new(EmailChannel::from_config(&config.email)?));
        }

        info!(
            "Notification channels: [{}]",
            channels.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self::new(channels))
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send to every channel; one failing channel never skips the next
    pub async fn notify(&self, notice: &DeployNotice) {
        for channel in &self.channels {
            match channel.send(notice).await {
                Ok(()) => info!("{} notification sent: {}", channel.name(), notice.summary()),
                Err(e) => warn!("{} notification failed: {}", channel.name(), e),
            }
        }
    }

    /// Send a test message on every channel and return the first error
    pub async fn send_test_notification(&self) -> Result<(), AppError> {
        let mut first_err = None;
        for channel in &self.channels {
            if let Err(e) = channel.send_test().await {
                warn!("{} test notification failed: {}", channel.name(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeployNotifier for Notifier {
    async fn notify_success(&self, spec: &DeploymentSpec, commit: &str) {
        self.notify(&DeployNotice::new(spec, commit, Outcome::Success))
            .await;
    }

    async fn notify_failure(&self, spec: &DeploymentSpec, commit: &str, error: &str) {
        self.notify(&DeployNotice::new(
            spec,
            commit,
            Outcome::Failure(error.to_string()),
        ))
        .await;
    }
}
