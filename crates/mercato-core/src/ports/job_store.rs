//! Job store port - the durable source of truth for every job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobId, JobState};
use crate::error::StoreError;

/// Persistence contract for jobs.
///
/// Every operation is atomic with respect to a single record, and every
/// operation fails fast with [`StoreError::Unavailable`] while the backing
/// connection is down.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Whether the backing connection is currently established.
    async fn is_available(&self) -> bool;

    /// True when the backend cannot safely serve claims from more than one
    /// process (embedded databases). Such stores require a worker lease.
    fn single_writer(&self) -> bool {
        false
    }

    /// Insert a new PENDING record and return it with its assigned id.
    async fn create(&self, job: Job) -> Result<Job, StoreError>;

    /// Claim the oldest eligible job of a queue, marking it RUNNING.
    ///
    /// Selection and the RUNNING write happen as one atomic step with respect
    /// to every other claimant. RETRYING jobs still inside their backoff
    /// delay are skipped.
    async fn claim_next(&self, queue_name: &str) -> Result<Option<Job>, StoreError>;

    /// Persist all mutable fields of a job.
    ///
    /// A no-op when the stored record is already settled.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Settle an unsettled job as CANCELLED in one conditional write,
    /// leaving every other field as stored.
    ///
    /// Returns `false` when the job had already settled.
    async fn cancel(&self, id: JobId) -> Result<bool, StoreError>;

    /// Persist progress of a RUNNING job; a no-op in any other state.
    async fn update_progress(&self, id: JobId, progress: u8) -> Result<(), StoreError>;

    async fn find_one(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn find_many(&self, options: &JobListOptions) -> Result<JobList, StoreError>;

    async fn find_many_by_ids(&self, ids: &[JobId]) -> Result<Vec<Job>, StoreError>;

    /// Delete settled jobs, optionally limited to some queues, that settled
    /// before `older_than` (default: now). Returns the number removed.
    async fn remove_settled(
        &self,
        queue_names: &[String],
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError>;

    /// Return RUNNING jobs not updated since `older_than` to the queue, or
    /// fail them if they have no retries left. Returns the number touched.
    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats, StoreError>;

    /// Take (or refresh) the exclusive worker lease of a single-writer store.
    async fn acquire_worker_lease(&self, _worker_id: &str, _ttl: Duration) -> Result<(), StoreError> {
        Ok(())
    }

    async fn release_worker_lease(&self, _worker_id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Filter, sort and pagination for administrative job listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobListOptions {
    pub skip: u64,
    pub take: Option<u64>,
    pub filter: JobFilter,
    pub sort: JobSort,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    /// Empty means every queue.
    pub queue_names: Vec<String>,
    /// Empty means every state.
    pub states: Vec<JobState>,
    pub is_settled: Option<bool>,
}

impl JobFilter {
    pub fn matches(&self, queue_name: &str, state: JobState) -> bool {
        (self.queue_names.is_empty() || self.queue_names.iter().any(|q| q == queue_name))
            && (self.states.is_empty() || self.states.contains(&state))
            && self.is_settled.is_none_or(|settled| state.is_settled() == settled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobSortField {
    Id,
    #[default]
    CreatedAt,
    UpdatedAt,
    SettledAt,
    QueueName,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSort {
    pub field: JobSortField,
    pub order: SortOrder,
}

/// A page of jobs plus the total number matching the filter.
#[derive(Debug, Clone, Default)]
pub struct JobList {
    pub items: Vec<Job>,
    pub total_items: u64,
}

/// Job counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub retrying: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueStats {
    pub fn record(&mut self, state: JobState, count: u64) {
        let slot = match state {
            JobState::Pending => &mut self.pending,
            JobState::Running => &mut self.running,
            JobState::Retrying => &mut self.retrying,
            JobState::Completed => &mut self.completed,
            JobState::Failed => &mut self.failed,
            JobState::Cancelled => &mut self.cancelled,
        };
        *slot += count;
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.retrying + self.completed + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_queue_state_and_settlement() {
        let mut job = Job::new("idx", json!({}));
        job.start().unwrap();
        job.complete(json!(null)).unwrap();
        let matches = |filter: &JobFilter| filter.matches(job.queue_name(), job.state());

        let by_queue = JobFilter {
            queue_names: vec!["idx".into()],
            ..Default::default()
        };
        assert!(matches(&by_queue));

        let other_queue = JobFilter {
            queue_names: vec!["mail".into()],
            ..Default::default()
        };
        assert!(!matches(&other_queue));

        let unsettled = JobFilter {
            is_settled: Some(false),
            ..Default::default()
        };
        assert!(!matches(&unsettled));

        let completed = JobFilter {
            states: vec![JobState::Completed],
            is_settled: Some(true),
            ..Default::default()
        };
        assert!(matches(&completed));
    }

    #[test]
    fn test_stats_total() {
        let mut stats = QueueStats::default();
        stats.record(JobState::Pending, 3);
        stats.record(JobState::Failed, 2);
        stats.record(JobState::Pending, 1);
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.total(), 6);
    }
}
