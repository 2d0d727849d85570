//! Notification channel.
//!
//! The scheduler only needs "deliver this message to this address, tell
//! me whether it worked". [`HttpMailNotifier`] does that by posting JSON
//! to a transactional-mail relay:
//!
//! ```json
//! { "from": "...", "to": "...", "subject": "...", "text": "...", "html": "..." }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use mindflow_core::models::Task;
use mindflow_core::reminder::ReminderContent;

use crate::config::{env_secret, MailConfig};

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl OutgoingMail {
    pub fn reminder(recipient: &str, task: &Task) -> Self {
        let content = ReminderContent::for_task(task);
        Self {
            to: recipient.to_string(),
            subject: content.subject,
            text: content.text,
            html: content.html,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail delivery is disabled")]
    Disabled,

    #[error("mail relay rejected message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("mail transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError>;

    /// `false` when no delivery is possible at all. The scheduler then
    /// skips dispatch instead of recording a failure per task per tick.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when `[mail] provider = "disabled"`. Every send fails; the
/// scheduler leaves reminders un-notified until mail is configured.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _mail: &OutgoingMail) -> Result<(), NotifyError> {
        Err(NotifyError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

pub struct HttpMailNotifier {
    http: reqwest::Client,
    endpoint: String,
    from: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

impl HttpMailNotifier {
    pub fn new(
        endpoint: &str,
        from: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            from: from.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Notifier for HttpMailNotifier {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let payload = RelayPayload {
            from: &self.from,
            to: &mail.to,
            subject: &mail.subject,
            text: &mail.text,
            html: &mail.html,
        };

        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(to = %mail.to, subject = %mail.subject, "mail accepted by relay");
        Ok(())
    }
}

/// Build the notifier selected by `[mail] provider`.
pub fn build_notifier(config: &MailConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledNotifier)),
        "http" => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("mail.endpoint is required for provider 'http'"))?;
            let from = config
                .from
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("mail.from is required for provider 'http'"))?;
            Ok(Arc::new(HttpMailNotifier::new(
                endpoint,
                from,
                env_secret(&config.api_key_env),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => anyhow::bail!("Unknown mail provider: '{}'", other),
    }
}
