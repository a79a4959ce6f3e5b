//! Polling queue strategy - one timer-driven claim loop per active queue.

mod progress;
mod strategy;

pub use strategy::{PollingQueueStrategy, process_next};

use std::time::Duration;

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Wait between polls when a queue has nothing to claim.
    pub poll_interval: Duration,
    /// Queues this process polls. `None` polls every registered queue.
    pub active_queues: Option<Vec<String>>,
    /// How long an embedded-store worker lease survives without a heartbeat.
    pub lease_ttl: Duration,
    /// Identifies this process in worker leases and logs.
    pub worker_id: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            active_queues: None,
            lease_ttl: Duration::from_secs(30),
            worker_id: format!("worker-{}", std::process::id()),
        }
    }
}

impl PollingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: std::env::var("JOB_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            active_queues: std::env::var("JOB_ACTIVE_QUEUES").ok().map(|s| {
                s.split(',')
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect()
            }),
            lease_ttl: std::env::var("JOB_LEASE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_ttl),
            worker_id: std::env::var("SERVICE_NAME")
                .map(|name| format!("{}-{}", name, std::process::id()))
                .unwrap_or(defaults.worker_id),
        }
    }

    pub fn is_active(&self, queue_name: &str) -> bool {
        self.active_queues
            .as_ref()
            .is_none_or(|queues| queues.iter().any(|q| q == queue_name))
    }
}
