//! Failed-job alerting layer for tracing.
//!
//! Every terminal job failure is logged at ERROR with the job's `queue`
//! field. This layer picks those events out and dispatches them to an alert
//! channel (console or webhook) on a background task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::{Layer, layer::Context};

const ALERT_BUFFER: usize = 100;

/// A job-related error event.
#[derive(Debug, Clone)]
pub struct FailedJobAlert {
    pub message: String,
    pub target: String,
    pub queue: String,
    pub job_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl FailedJobAlert {
    pub fn summary(&self) -> String {
        let job = self.job_id.as_deref().unwrap_or("?");
        match &self.error {
            Some(error) => format!("{} (job {} on {}): {}", self.message, job, self.queue, error),
            None => format!("{} (job {} on {})", self.message, job, self.queue),
        }
    }
}

/// Trait for alert senders - implement this for different backends.
#[async_trait::async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, alert: FailedJobAlert) -> Result<(), AlertError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Failed to send alert: {0}")]
    SendError(String),
}

/// Console alert sender - prints alerts to stderr (for development).
pub struct ConsoleAlertSender;

#[async_trait::async_trait]
impl AlertSender for ConsoleAlertSender {
    async fn send(&self, alert: FailedJobAlert) -> Result<(), AlertError> {
        eprintln!(
            "\nJOB FAILURE ALERT\n\
             Queue: {}\n\
             Job: {}\n\
             Source: {}\n\
             Error: {}\n\
             Time: {}\n",
            alert.queue,
            alert.job_id.as_deref().unwrap_or("?"),
            alert.target,
            alert.error.as_deref().unwrap_or(&alert.message),
            alert.timestamp
        );
        Ok(())
    }
}

/// Webhook alert sender - posts alerts to a webhook URL (Slack, Discord, etc.).
pub struct WebhookAlertSender {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSender {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl AlertSender for WebhookAlertSender {
    async fn send(&self, alert: FailedJobAlert) -> Result<(), AlertError> {
        let payload = serde_json::json!({
            "text": format!("*Job failed*\n{}\n*Time:* {}", alert.summary(), alert.timestamp),
            "queue": alert.queue,
            "jobId": alert.job_id,
        });

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AlertError::SendError(e.to_string()))?;

        Ok(())
    }
}

/// Tracing layer that raises an alert for ERROR events about a job.
pub struct FailedJobAlertLayer {
    sender: mpsc::Sender<FailedJobAlert>,
}

impl FailedJobAlertLayer {
    pub fn new(alert_sender: Arc<dyn AlertSender>) -> Self {
        let (tx, mut rx) = mpsc::channel::<FailedJobAlert>(ALERT_BUFFER);

        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = alert_sender.send(alert).await {
                    // Logging here would feed back into this layer.
                    eprintln!("Failed to send alert: {}", e);
                }
            }
        });

        Self { sender: tx }
    }

    pub fn console() -> Self {
        Self::new(Arc::new(ConsoleAlertSender))
    }

    pub fn webhook(url: String) -> Self {
        Self::new(Arc::new(WebhookAlertSender::new(url)))
    }
}

/// Visitor to extract fields from events.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    queue: Option<String>,
    job_id: Option<String>,
    error: Option<String>,
}

impl FieldVisitor {
    fn store(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "queue" => self.queue = Some(value),
            "job_id" => self.job_id = Some(value),
            "error" => self.error = Some(value),
            _ => {}
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.store(field.name(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.store(field.name(), value.to_string());
    }
}

impl<S> Layer<S> for FailedJobAlertLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::ERROR {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let Some(queue) = visitor.queue else {
            return;
        };

        let alert = FailedJobAlert {
            message: visitor.message,
            target: event.metadata().target().to_string(),
            queue,
            job_id: visitor.job_id,
            error: visitor.error,
            timestamp: chrono::Utc::now(),
        };

        // Non-blocking send; alerts are dropped when the channel is full.
        let _ = self.sender.try_send(alert);
    }
}
