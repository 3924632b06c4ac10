//! Team-chat incoming-webhook channel

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppError;
use crate::notify::{DeployNotice, NotificationChannel};

/// Chat message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub color: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

impl Field {
    fn short(title: &str, value: &str) -> Self {
        Self {
            title: title.to_string(),
            value: value.to_string(),
            short: true,
        }
    }
}

/// Build the chat payload for a finished deployment
pub fn build_message(notice: &DeployNotice) -> ChatMessage {
    let color = if notice.is_success() { "good" } else { "danger" };
    ChatMessage {
        text: notice.summary(),
        attachments: vec![Attachment {
            color: color.to_string(),
            title: format!("Deployment details: {}", notice.project),
            text: None,
            fields: vec![
                Field::short("Project", &notice.project),
                Field::short("Repository", &notice.repository),
                Field::short("Branch", &notice.branch),
                Field::short("Commit", notice.short_commit()),
            ],
            ts: notice.timestamp.timestamp(),
        }],
    }
}

fn build_test_message() -> ChatMessage {
    ChatMessage {
        text: "Test notification".to_string(),
        attachments: vec![Attachment {
            color: "warning".to_string(),
            title: "System test".to_string(),
            text: Some("This is a test notification confirming the deployment service works.".to_string()),
            fields: Vec::new(),
            ts: chrono::Utc::now().timestamp(),
        }],
    }
}

/// Posts JSON messages to a chat webhook URL
pub struct ChatWebhookChannel {
    client: Client,
    url: String,
}

impl ChatWebhookChannel {
    /// Create a new channel
    pub fn new(url: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn post(&self, message: &ChatMessage) -> Result<(), AppError> {
        debug!("POST {} (chat notification)", self.url);

        let response = self.client.post(&self.url).json(message).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NotifyError(format!(
                "chat webhook returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for ChatWebhookChannel {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn send(&self, notice: &DeployNotice) -> Result<(), AppError> {
        self.post(&build_message(notice)).await
    }

    async fn send_test(&self) -> Result<(), AppError> {
        self.post(&build_test_message()).await
    }
}
