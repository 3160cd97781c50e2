//! 📣 Notify: telling a human that something happened, with a severity and an audience.
//!
//! 🧠 Knowledge graph:
//! - [`Notifier`]: `notify(severity, audience, body)`. That is the whole contract.
//! - [`LogNotifier`]: writes the notice to the tracing log. The dry-run default.
//! - [`WebhookNotifier`]: POSTs `{from, to, subject, severity, body}` as JSON to a mail
//!   relay or chat hook. Recipient is chosen by audience, subject by severity.
//! - [`RecordingNotifier`]: keeps every notice in memory for tests to inspect.
//! - [`NotifierBackend`]: enum dispatch, built from [`NotifyConfig`].
//!
//! A notifier failing is logged by the caller and never replaces the error it was
//! trying to report. Nobody wants "failed to send the failure email" as a root cause. 📭

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Success,
    Info,
}

/// 👥 Primary is whoever owns the job, secondary the data-quality folks, tertiary
/// anyone else who asked to be cc'd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Primary,
    Secondary,
    Tertiary,
}

#[async_trait]
pub trait Notifier: std::fmt::Debug + Send + Sync {
    async fn notify(&self, severity: Severity, audience: Audience, body: &str)
    -> anyhow::Result<()>;
}

/// 📜 Notices go to the log and nowhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        severity: Severity,
        audience: Audience,
        body: &str,
    ) -> anyhow::Result<()> {
        match severity {
            Severity::Error => error!(?audience, "📣 {body}"),
            Severity::Success => info!(?audience, "📣 ✅ {body}"),
            Severity::Info => warn!(?audience, "📣 {body}"),
        }
        Ok(())
    }
}

/// 🧾 One captured notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub audience: Audience,
    pub body: String,
}

/// 🎙️ Remembers everything it was told. Clones share the same tape.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    notices: Arc<tokio::sync::Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notices(&self) -> Vec<Notice> {
        self.notices.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        severity: Severity,
        audience: Audience,
        body: &str,
    ) -> anyhow::Result<()> {
        self.notices.lock().await.push(Notice {
            severity,
            audience,
            body: body.to_string(),
        });
        Ok(())
    }
}

/// 📮 Who gets which audience. Secondary and tertiary fall back to primary.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Recipients {
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub tertiary: Option<String>,
}

impl Recipients {
    pub fn for_audience(&self, audience: Audience) -> &str {
        match audience {
            Audience::Primary => &self.primary,
            Audience::Secondary => self.secondary.as_deref().unwrap_or(&self.primary),
            Audience::Tertiary => self.tertiary.as_deref().unwrap_or(&self.primary),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Subjects {
    #[serde(default = "default_error_subject")]
    pub error: String,
    #[serde(default = "default_success_subject")]
    pub success: String,
    #[serde(default = "default_info_subject")]
    pub info: String,
}

fn default_error_subject() -> String {
    "tbx: load failed".to_string()
}

fn default_success_subject() -> String {
    "tbx: load complete".to_string()
}

fn default_info_subject() -> String {
    "tbx: dirty data".to_string()
}

impl Default for Subjects {
    fn default() -> Self {
        Self {
            error: default_error_subject(),
            success: default_success_subject(),
            info: default_info_subject(),
        }
    }
}

impl Subjects {
    pub fn for_severity(&self, severity: Severity) -> &str {
        match severity {
            Severity::Error => &self.error,
            Severity::Success => &self.success,
            Severity::Info => &self.info,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    pub sender: String,
    pub recipients: Recipients,
    #[serde(default)]
    pub subjects: Subjects,
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    severity: Severity,
    body: &'a str,
}

/// 🪝 JSON over HTTP to whatever relays it onward.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 Could not build the webhook HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        severity: Severity,
        audience: Audience,
        body: &str,
    ) -> anyhow::Result<()> {
        let message = WebhookMessage {
            from: &self.config.sender,
            to: self.config.recipients.for_audience(audience),
            subject: self.config.subjects.for_severity(severity),
            severity,
            body,
        };
        let payload = serde_json::to_string(&message)?;
        let response = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("💀 Webhook {} did not answer", self.config.url))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("💀 Webhook refused the notice with HTTP {status}: {text}");
        }
        Ok(())
    }
}

/// 🔧 Where notices go.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub enum NotifyConfig {
    #[default]
    Log,
    Webhook(WebhookConfig),
}

#[derive(Debug, Clone)]
pub enum NotifierBackend {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
    Recording(RecordingNotifier),
}

impl NotifierBackend {
    pub fn from_config(config: &NotifyConfig) -> anyhow::Result<Self> {
        Ok(match config {
            NotifyConfig::Log => Self::Log(LogNotifier),
            NotifyConfig::Webhook(webhook) => Self::Webhook(WebhookNotifier::new(webhook.clone())?),
        })
    }
}

#[async_trait]
impl Notifier for NotifierBackend {
    async fn notify(
        &self,
        severity: Severity,
        audience: Audience,
        body: &str,
    ) -> anyhow::Result<()> {
        match self {
            Self::Log(n) => n.notify(severity, audience, body).await,
            Self::Webhook(n) => n.notify(severity, audience, body).await,
            Self::Recording(n) => n.notify(severity, audience, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook_config(url: String) -> WebhookConfig {
        WebhookConfig {
            url,
            sender: "etl@example.com".into(),
            recipients: Recipients {
                primary: "owner@example.com".into(),
                secondary: Some("helpdesk@example.com".into()),
                tertiary: None,
            },
            subjects: Subjects::default(),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_helpdesk_gets_the_dirty_data() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(serde_json::json!({
                "from": "etl@example.com",
                "to": "helpdesk@example.com",
                "subject": "tbx: dirty data",
                "severity": "info",
                "body": "Dirty data - skipped records:\n42\n",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(webhook_config(format!("{}/hook", server.uri())))?;
        notifier
            .notify(
                Severity::Info,
                Audience::Secondary,
                "Dirty data - skipped records:\n42\n",
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_hook_hangs_up_on_us() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("relay down"))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(webhook_config(server.uri()))?;
        let err = notifier
            .notify(Severity::Error, Audience::Primary, "boom")
            .await
            .expect_err("500 must surface");
        assert!(err.to_string().contains("relay down"));
        Ok(())
    }

    #[test]
    fn the_one_where_tertiary_falls_back_to_primary() {
        let config = webhook_config("http://unused".into());
        assert_eq!(
            config.recipients.for_audience(Audience::Tertiary),
            "owner@example.com"
        );
        assert_eq!(config.subjects.for_severity(Severity::Success), "tbx: load complete");
    }

    #[tokio::test]
    async fn the_one_where_the_recorder_remembers_everything() -> anyhow::Result<()> {
        let recorder = RecordingNotifier::new();
        let backend = NotifierBackend::Recording(recorder.clone());
        backend.notify(Severity::Success, Audience::Primary, "done").await?;
        LogNotifier.notify(Severity::Info, Audience::Tertiary, "fyi").await?;
        assert_eq!(
            recorder.notices().await,
            vec![Notice {
                severity: Severity::Success,
                audience: Audience::Primary,
                body: "done".into(),
            }]
        );
        Ok(())
    }
}
