//! In-memory job store.
//!
//! Used when no database is configured and in tests.
//! Note: Jobs are lost on process restart, and the store cannot be shared
//! between processes.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use mercato_core::ports::{
    BackoffStrategy, JobList, JobListOptions, JobSortField, JobStore, QueueStats, SortOrder,
};
use mercato_core::{Job, JobId, JobRecord, JobState, StoreError};

use super::{ABANDONED_JOB_ERROR, PayloadLimits, backoff_elapsed};

struct StoreState {
    next_id: i64,
    records: BTreeMap<JobId, JobRecord>,
}

/// In-memory job store guarded by a single async mutex.
///
/// Every operation holds the mutex for its whole duration, so a claim is
/// trivially atomic with respect to every other claimant in the process.
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    available: AtomicBool,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    limits: PayloadLimits,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                next_id: 1,
                records: BTreeMap::new(),
            }),
            available: AtomicBool::new(true),
            backoff: None,
            limits: PayloadLimits::unlimited(),
        }
    }

    /// Delay re-claiming RETRYING jobs with the given strategy.
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_payload_limits(mut self, limits: PayloadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Simulate the backing connection going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn constrain(&self, record: &mut JobRecord) {
        if let Some(reduced) = self.limits.constrain(&record.queue_name, &record.data) {
            record.data = reduced;
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn compare(a: &JobRecord, b: &JobRecord, field: JobSortField) -> CmpOrdering {
    let primary = match field {
        JobSortField::Id => CmpOrdering::Equal,
        JobSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        JobSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        JobSortField::SettledAt => a.settled_at.cmp(&b.settled_at),
        JobSortField::QueueName => a.queue_name.cmp(&b.queue_name),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let id = JobId(state.next_id);
        state.next_id += 1;

        let now = Utc::now();
        let mut record = JobRecord::from(job);
        record.id = Some(id);
        record.created_at = now;
        record.updated_at = now;
        self.constrain(&mut record);

        state.records.insert(id, record.clone());
        Ok(record.into())
    }

    async fn claim_next(&self, queue_name: &str) -> Result<Option<Job>, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<&JobRecord> = state
            .records
            .values()
            .filter(|r| r.queue_name == queue_name && r.state.is_claimable())
            .collect();
        candidates.sort_by(|a, b| compare(a, b, JobSortField::CreatedAt));

        let backoff = self.backoff.as_deref();
        let Some(mut job) = candidates
            .into_iter()
            .map(|r| Job::from(r.clone()))
            .find(|job| backoff_elapsed(backoff, job, now))
        else {
            return Ok(None);
        };

        job.start()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut record = JobRecord::from(&job);
        record.updated_at = now;
        let Some(id) = record.id else {
            return Err(StoreError::NotPersisted);
        };
        state.records.insert(id, record.clone());
        Ok(Some(record.into()))
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.ensure_available()?;
        let id = job.id().ok_or(StoreError::NotPersisted)?;
        let mut state = self.state.lock().await;

        let stored = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if stored.is_settled() {
            tracing::debug!(job_id = %id, state = %stored.state, "Ignoring update to settled job");
            return Ok(());
        }

        let mut record = JobRecord::from(job);
        record.queue_name = stored.queue_name.clone();
        record.created_at = stored.created_at;
        record.updated_at = Utc::now();
        self.constrain(&mut record);
        *stored = record;
        Ok(())
    }

    async fn cancel(&self, id: JobId) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.is_settled() {
            return Ok(false);
        }
        let now = Utc::now();
        record.state = JobState::Cancelled;
        record.settled_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn update_progress(&self, id: JobId, progress: u8) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(record) if record.state == JobState::Running => {
                record.progress = progress.min(100);
                record.updated_at = Utc::now();
            }
            _ => {}
        }
        Ok(())
    }

    async fn find_one(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned().map(Into::into))
    }

    async fn find_many(&self, options: &JobListOptions) -> Result<JobList, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let mut matching: Vec<&JobRecord> = state
            .records
            .values()
            .filter(|r| options.filter.matches(&r.queue_name, r.state))
            .collect();
        let total_items = matching.len() as u64;

        matching.sort_by(|a, b| {
            let ordering = compare(a, b, options.sort.field);
            match options.sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let items = matching
            .into_iter()
            .skip(options.skip as usize)
            .take(options.take.map_or(usize::MAX, |t| t as usize))
            .map(|r| Job::from(r.clone()))
            .collect();

        Ok(JobList { items, total_items })
    }

    async fn find_many_by_ids(&self, ids: &[JobId]) -> Result<Vec<Job>, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .map(Into::into)
            .collect())
    }

    async fn remove_settled(
        &self,
        queue_names: &[String],
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let cutoff = older_than.unwrap_or_else(Utc::now);
        let mut state = self.state.lock().await;

        let before = state.records.len();
        state.records.retain(|_, r| {
            let removable = r.is_settled()
                && r.settled_at.is_some_and(|settled| settled < cutoff)
                && (queue_names.is_empty() || queue_names.contains(&r.queue_name));
            !removable
        });
        Ok((before - state.records.len()) as u64)
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let mut touched = 0;
        for record in state.records.values_mut() {
            if record.state != JobState::Running || record.updated_at >= older_than {
                continue;
            }
            record.error = Some(ABANDONED_JOB_ERROR.to_string());
            record.updated_at = now;
            if record.attempts <= record.retries {
                record.state = JobState::Retrying;
            } else {
                record.state = JobState::Failed;
                record.settled_at = Some(now);
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let mut stats = QueueStats::default();
        for record in state.records.values() {
            if queue_name.is_none_or(|q| q == record.queue_name) {
                stats.record(record.state, 1);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mercato_core::ports::{ConstantBackoff, JobFilter, JobSort};
    use serde_json::json;

    async fn settle(store: &InMemoryJobStore, queue: &str) -> Job {
        let created = store.create(Job::new(queue, json!({}))).await.unwrap();
        let mut job = store.claim_next(queue).await.unwrap().unwrap();
        assert_eq!(job.id(), created.id());
        job.complete(json!("ok")).unwrap();
        store.update(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_cancel_only_touches_unsettled_jobs() {
        let store = InMemoryJobStore::new();
        store.create(Job::new("idx", json!({}))).await.unwrap();
        let running = store.claim_next("idx").await.unwrap().unwrap();
        let id = running.id().unwrap();

        assert!(store.cancel(id).await.unwrap());
        let stored = store.find_one(id).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Cancelled);
        assert_eq!(stored.attempts(), 1);
        assert_eq!(stored.started_at(), running.started_at());

        assert!(!store.cancel(id).await.unwrap());
        assert!(matches!(store.cancel(JobId(9)).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = InMemoryJobStore::new();
        let a = store.create(Job::new("idx", json!({ "n": 1 }))).await.unwrap();
        let b = store.create(Job::new("idx", json!({ "n": 2 }))).await.unwrap();

        assert_eq!(a.id(), Some(JobId(1)));
        assert_eq!(b.id(), Some(JobId(2)));
        assert_eq!(a.state(), JobState::Pending);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let store = InMemoryJobStore::new();
        store.set_available(false);

        let err = store.create(Job::new("idx", json!({}))).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.claim_next("idx").await.unwrap_err().is_unavailable());
        assert!(!store.is_available().await);
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_marks_running() {
        let store = InMemoryJobStore::new();
        for n in 0..3 {
            store.create(Job::new("idx", json!({ "n": n }))).await.unwrap();
        }
        store.create(Job::new("mail", json!({}))).await.unwrap();

        for n in 0..3 {
            let job = store.claim_next("idx").await.unwrap().unwrap();
            assert_eq!(job.data()["n"], n);
            assert_eq!(job.state(), JobState::Running);
            assert_eq!(job.attempts(), 1);
            assert!(job.started_at().is_some());
        }
        assert!(store.claim_next("idx").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retrying_job_waits_for_backoff() {
        let store = InMemoryJobStore::new()
            .with_backoff(Arc::new(ConstantBackoff(Duration::from_secs(3600))));
        store
            .create(Job::new("idx", json!({ "n": 1 })).with_retries(1))
            .await
            .unwrap();
        store.create(Job::new("idx", json!({ "n": 2 }))).await.unwrap();

        let mut first = store.claim_next("idx").await.unwrap().unwrap();
        first.fail("boom").unwrap();
        store.update(&first).await.unwrap();

        // The older job is still backing off, so the newer one is next.
        let next = store.claim_next("idx").await.unwrap().unwrap();
        assert_eq!(next.data()["n"], 2);
        assert!(store.claim_next("idx").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_of_settled_job_is_ignored() {
        let store = InMemoryJobStore::new();
        let done = settle(&store, "idx").await;

        // A stale projection that still believes it is running.
        let mut stale = Job::from(JobRecord {
            state: JobState::Running,
            settled_at: None,
            ..JobRecord::from(&done)
        });
        stale.fail("late failure").unwrap();
        store.update(&stale).await.unwrap();

        let stored = store.find_one(done.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Completed);
        assert_eq!(stored.result(), Some(&json!("ok")));
        assert!(stored.error().is_none());
    }

    #[tokio::test]
    async fn test_progress_only_written_while_running() {
        let store = InMemoryJobStore::new();
        let pending = store.create(Job::new("idx", json!({}))).await.unwrap();
        let id = pending.id().unwrap();

        store.update_progress(id, 40).await.unwrap();
        assert_eq!(store.find_one(id).await.unwrap().unwrap().progress(), 0);

        store.claim_next("idx").await.unwrap().unwrap();
        store.update_progress(id, 40).await.unwrap();
        assert_eq!(store.find_one(id).await.unwrap().unwrap().progress(), 40);
    }

    #[tokio::test]
    async fn test_remove_settled_by_queue_and_age() {
        let store = InMemoryJobStore::new();
        for _ in 0..5 {
            settle(&store, "idx").await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        for _ in 0..2 {
            settle(&store, "idx").await;
        }
        settle(&store, "mail").await;
        store.create(Job::new("idx", json!({}))).await.unwrap();

        let removed = store
            .remove_settled(&["idx".to_string()], Some(cutoff))
            .await
            .unwrap();

        assert_eq!(removed, 5);
        let remaining = store.find_many(&JobListOptions::default()).await.unwrap();
        assert_eq!(remaining.total_items, 4);
    }

    #[tokio::test]
    async fn test_requeue_stale_running_jobs() {
        let store = InMemoryJobStore::new();
        store
            .create(Job::new("idx", json!({})).with_retries(1))
            .await
            .unwrap();
        store.create(Job::new("idx", json!({}))).await.unwrap();
        let retryable = store.claim_next("idx").await.unwrap().unwrap();
        let exhausted = store.claim_next("idx").await.unwrap().unwrap();

        let touched = store
            .requeue_stale(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(touched, 2);

        let retryable = store.find_one(retryable.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(retryable.state(), JobState::Retrying);
        let exhausted = store.find_one(exhausted.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(exhausted.state(), JobState::Failed);
        assert_eq!(exhausted.error(), Some(ABANDONED_JOB_ERROR));
        assert!(exhausted.settled_at().is_some());
    }

    #[tokio::test]
    async fn test_find_many_filters_sorts_and_pages() {
        let store = InMemoryJobStore::new();
        for _ in 0..3 {
            settle(&store, "idx").await;
        }
        store.create(Job::new("idx", json!({}))).await.unwrap();

        let options = JobListOptions {
            skip: 1,
            take: Some(1),
            filter: JobFilter {
                is_settled: Some(true),
                ..Default::default()
            },
            sort: JobSort {
                field: JobSortField::Id,
                order: SortOrder::Asc,
            },
        };
        let page = store.find_many(&options).await.unwrap();

        assert_eq!(page.total_items, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id(), Some(JobId(2)));

        let stats = store.stats(Some("idx")).await.unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.pending, 1);
    }
}
