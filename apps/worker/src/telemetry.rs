//! Telemetry initialization - tracing and failed-job alerting setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::observability::FailedJobAlertLayer;

/// Targets that log one event per job lifecycle step.
const JOB_TARGETS: [&str; 3] = [
    "mercato_infra::polling",
    "mercato_infra::queue",
    "mercato_infra::buffer",
];

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Emit one JSON object per event instead of the pretty format.
    pub json_logs: bool,
    pub service_name: String,
    /// Level for the per-job lifecycle targets, e.g. `warn` to silence
    /// enqueue/claim/complete chatter on busy queues.
    pub job_log_level: String,
    /// Forward terminally failed jobs to an alert channel.
    pub alerts_enabled: bool,
    /// Webhook URL for alerts (Slack, Discord, etc.).
    pub alert_webhook_url: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            service_name: "mercato-worker".to_string(),
            job_log_level: "debug".to_string(),
            alerts_enabled: true,
            alert_webhook_url: None,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.json_logs),
            service_name: std::env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            job_log_level: std::env::var("JOB_LOG_LEVEL").unwrap_or(defaults.job_log_level),
            alerts_enabled: std::env::var("ALERTS_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.alerts_enabled),
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
        }
    }

    /// Default filter directives, used when `RUST_LOG` is unset.
    fn default_directives(&self) -> String {
        let mut directives = vec!["info".to_string(), "worker=debug".to_string()];
        directives.extend(
            JOB_TARGETS
                .iter()
                .map(|target| format!("{target}={}", self.job_log_level)),
        );
        directives.join(",")
    }
}

/// Initialize tracing and alerting. Must run inside the async runtime.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let alert_layer = config.alerts_enabled.then(|| match &config.alert_webhook_url {
        Some(webhook_url) => FailedJobAlertLayer::webhook(webhook_url.clone()),
        None => FailedJobAlertLayer::console(),
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(alert_layer);
    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        job_log_level = %config.job_log_level,
        alert_webhook = config.alert_webhook_url.is_some(),
        "Telemetry initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_job_targets() {
        let config = TelemetryConfig {
            job_log_level: "warn".to_string(),
            ..Default::default()
        };
        let directives = config.default_directives();

        assert!(directives.starts_with("info,worker=debug"));
        assert!(directives.contains("mercato_infra::polling=warn"));
        assert!(directives.contains("mercato_infra::buffer=warn"));
        EnvFilter::try_new(directives).unwrap();
    }
}
