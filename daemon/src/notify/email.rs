//! SMTP email channel

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::EmailConfig;
use crate::errors::AppError;
use crate::notify::{DeployNotice, NotificationChannel, Outcome};

/// Implicit TLS submission port; anything else negotiates STARTTLS
const SMTPS_PORT: u16 = 465;

/// Sends plain-text deployment reports over SMTP
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// Build the channel. No connection is made until the first send.
    pub fn from_config(config: &EmailConfig) -> Result<Self, AppError> {
        let from = parse_mailbox(config.sender())?;
        let to = config
            .to
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;

        let builder = if config.smtp_port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(|e| AppError::ConfigError(format!("smtp relay {}: {}", config.smtp_host, e)))?;

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(30)));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    async fn deliver(&self, subject: String, body: String) -> Result<(), AppError> {
        let mut message = Message::builder().from(self.from.clone());
        for recipient in &self.to {
            message = message.to(recipient.clone());
        }
        let message = message
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| AppError::NotifyError(format!("cannot build email: {}", e)))?;

        debug!("Sending email to {} recipient(s)", self.to.len());
        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::NotifyError(format!("smtp send failed: {}", e)))?;
        Ok(())
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, AppError> {
    addr.parse()
        .map_err(|e| AppError::ConfigError(format!("invalid email address '{}': {}", addr, e)))
}

/// Subject and plain-text body for a finished deployment
pub fn compose(notice: &DeployNotice) -> (String, String) {
    let status = if notice.is_success() { "succeeded" } else { "failed" };
    let subject = notice.summary();

    let mut body = format!(
        "Deployment {status}.\n\n\
         Project:    {}\n\
         Repository: {}\n\
         Branch:     {}\n\
         Commit:     {}\n\
         Time:       {}\n",
        notice.project,
        notice.repository,
        notice.branch,
        notice.short_commit(),
        notice.timestamp.format("%Y-%m-%d %H:%M:%S"),
    );
    if let Outcome::Failure(error) = &notice.outcome {
        body.push_str("\nError:\n");
        body.push_str(error);
        body.push('\n');
    }
    (subject, body)
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, notice: &DeployNotice) -> Result<(), AppError> {
        let (subject, body) = compose(notice);
        self.deliver(subject, body).await
    }

    async fn send_test(&self) -> Result<(), AppError> {
        self.deliver(
            "Test notification".to_string(),
            "This is a test notification confirming the deployment service can send email.\n"
                .to_string(),
        )
        .await
    }
}
