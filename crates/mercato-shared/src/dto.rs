//! Data Transfer Objects - request/response types for the job admin API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: i64,
    pub queue_name: String,
    pub data: serde_json::Value,
    pub state: String,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub is_settled: bool,
    pub retries: u32,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Time from start to settlement (or now, while running).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// Query string of `GET /api/jobs`.
///
/// `queue` and `state` accept comma-separated lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListQuery {
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub queue: Option<String>,
    pub state: Option<String>,
    pub settled: Option<bool>,
    /// `id`, `createdAt`, `updatedAt`, `settledAt` or `queueName`.
    pub sort: Option<String>,
    /// `ASC` or `DESC`.
    pub order: Option<String>,
}

impl JobListQuery {
    pub fn queue_names(&self) -> Vec<String> {
        split_list(self.queue.as_deref())
    }

    pub fn states(&self) -> Vec<String> {
        split_list(self.state.as_deref())
    }
}

/// A page of jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub items: Vec<JobResponse>,
    pub total_items: u64,
}

/// Query string of `DELETE /api/jobs/settled`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeQuery {
    /// Comma-separated queue names; absent purges every queue.
    pub queue: Option<String>,
    /// Only purge jobs settled at least this many days ago.
    pub older_than_days: Option<u32>,
}

impl PurgeQuery {
    pub fn queue_names(&self) -> Vec<String> {
        split_list(self.queue.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub removed: u64,
}

/// Job counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub pending: u64,
    pub running: u64,
    pub retrying: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store_available: bool,
    pub registered_queues: Vec<String>,
    pub polled_queues: Vec<String>,
    pub buffered_jobs: BTreeMap<String, usize>,
    pub stats: Option<StatsResponse>,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}
