use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use mercato_core::ports::{JobBuffer, JobList, JobListOptions, JobProcessor, JobStore, QueueStats};
use mercato_core::{Job, JobId, JobStateError, QueueError, StoreError};

use super::handle::JobHandle;
use crate::buffer::JobBufferService;
use crate::polling::{PollingConfig, PollingQueueStrategy};

const MAX_QUEUE_NAME_LEN: usize = 255;

/// Queue service configuration.
#[derive(Debug, Clone)]
pub struct QueueServiceConfig {
    pub polling: PollingConfig,
    /// Quiet period after which a job buffer flushes.
    pub buffer_window: Duration,
    /// Retries given to jobs added without an explicit count.
    pub default_retries: u32,
}

impl Default for QueueServiceConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            buffer_window: Duration::from_millis(50),
            default_retries: 0,
        }
    }
}

impl QueueServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            polling: PollingConfig::from_env(),
            buffer_window: std::env::var("JOB_BUFFER_WINDOW_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.buffer_window),
            default_retries: std::env::var("JOB_DEFAULT_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_retries),
        }
    }
}

/// Per-job enqueue options.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// `None` uses the service default.
    pub retries: Option<u32>,
}

impl AddOptions {
    pub fn retries(retries: u32) -> Self {
        Self {
            retries: Some(retries),
        }
    }
}

/// Reject names that are empty, too long or contain anything besides ASCII
/// alphanumerics and `-_.`.
pub fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.len() > MAX_QUEUE_NAME_LEN {
        "must be at most 255 characters"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        "may only contain letters, digits, '-', '_' and '.'"
    } else {
        return Ok(());
    };
    Err(QueueError::InvalidQueueName {
        name: name.to_string(),
        reason,
    })
}

/// Entry point for enqueuing work and administering jobs.
///
/// Owns the queue registry, routes new jobs through the job buffers and
/// delegates everything else to the store.
pub struct JobQueueService {
    store: Arc<dyn JobStore>,
    strategy: PollingQueueStrategy,
    buffers: JobBufferService,
    registry: Mutex<HashMap<String, JobProcessor>>,
    default_retries: u32,
}

impl JobQueueService {
    pub fn new(store: Arc<dyn JobStore>, config: QueueServiceConfig) -> Self {
        Self {
            strategy: PollingQueueStrategy::new(store.clone(), config.polling),
            buffers: JobBufferService::new(store.clone(), config.buffer_window),
            store,
            registry: Mutex::new(HashMap::new()),
            default_retries: config.default_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn polling_config(&self) -> &PollingConfig {
        self.strategy.config()
    }

    /// Register the processor for `name` and start polling it if the queue
    /// is active in this process.
    pub async fn create_queue(
        self: &Arc<Self>,
        name: &str,
        processor: JobProcessor,
    ) -> Result<JobQueue, QueueError> {
        validate_queue_name(name)?;

        let mut registry = self.registry.lock().await;
        if registry.contains_key(name) {
            return Err(QueueError::DuplicateQueueRegistration(name.to_string()));
        }
        self.strategy.start(name, processor.clone()).await?;
        registry.insert(name.to_string(), processor);

        tracing::info!(queue = %name, "Queue registered");
        Ok(JobQueue {
            name: name.to_string(),
            service: Arc::clone(self),
        })
    }

    /// Enqueue a job. A job claimed by a buffer is persisted when the buffer
    /// flushes; the returned handle resolves its id then.
    pub async fn add(
        &self,
        queue_name: &str,
        data: serde_json::Value,
        options: AddOptions,
    ) -> Result<JobHandle, QueueError> {
        validate_queue_name(queue_name)?;
        let retries = options.retries.unwrap_or(self.default_retries);
        let job = Job::new(queue_name, data).with_retries(retries);
        let poll_interval = self.strategy.config().poll_interval;

        match self.buffers.collect(job).await {
            Ok(receipt) => {
                tracing::debug!(queue = %queue_name, "Job buffered");
                Ok(JobHandle::buffered(self.store.clone(), receipt, poll_interval))
            }
            Err(job) => {
                let job = self.store.create(job).await?;
                let id = job.id().ok_or(StoreError::NotPersisted)?;
                tracing::debug!(job_id = %id, queue = %queue_name, retries, "Job enqueued");
                Ok(JobHandle::persisted(self.store.clone(), id, poll_interval))
            }
        }
    }

    pub async fn add_buffer(&self, buffer: Arc<dyn JobBuffer>) -> bool {
        self.buffers.add_buffer(buffer).await
    }

    pub async fn remove_buffer(&self, id: &str) -> bool {
        self.buffers.remove_buffer(id).await
    }

    /// Flush the given buffers (all if `None`) immediately.
    pub async fn flush(&self, buffer_ids: Option<&[String]>) {
        self.buffers.flush(buffer_ids).await;
    }

    pub async fn buffer_sizes(&self) -> BTreeMap<String, usize> {
        self.buffers.buffer_sizes().await
    }

    pub async fn find_one(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.store.find_one(id).await?)
    }

    pub async fn find_many(&self, options: &JobListOptions) -> Result<JobList, QueueError> {
        Ok(self.store.find_many(options).await?)
    }

    pub async fn find_many_by_ids(&self, ids: &[JobId]) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.find_many_by_ids(ids).await?)
    }

    /// Delete settled jobs, optionally limited to some queues, settled before
    /// `older_than` (default: now).
    pub async fn remove_settled(
        &self,
        queue_names: &[String],
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64, QueueError> {
        let removed = self.store.remove_settled(queue_names, older_than).await?;
        tracing::info!(
            removed,
            queues = ?queue_names,
            older_than = ?older_than,
            "Removed settled jobs"
        );
        Ok(removed)
    }

    /// Mark an unsettled job CANCELLED and return it as stored afterwards.
    ///
    /// A processor already running the job is not interrupted; its own
    /// settlement becomes a no-op.
    pub async fn cancel_job(&self, id: JobId) -> Result<Job, QueueError> {
        let job = self.find_one(id).await?.ok_or(StoreError::NotFound(id))?;
        if job.is_settled() {
            return Err(JobStateError::new("cancel", job.state()).into());
        }

        // Settled by a worker since the read.
        if !self.store.cancel(id).await? {
            let current = self.find_one(id).await?.ok_or(StoreError::NotFound(id))?;
            return Err(JobStateError::new("cancel", current.state()).into());
        }
        tracing::info!(job_id = %id, queue = %job.queue_name(), "Job cancelled");

        Ok(self.find_one(id).await?.ok_or(StoreError::NotFound(id))?)
    }

    pub async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats, QueueError> {
        Ok(self.store.stats(queue_name).await?)
    }

    /// Names of every registered queue, sorted.
    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queues this process is polling.
    pub async fn polled_queues(&self) -> Vec<String> {
        self.strategy.polled_queues().await
    }

    /// Persist whatever the buffers hold, then stop polling and wait for
    /// in-flight jobs to settle.
    pub async fn stop(&self) {
        self.buffers.flush(None).await;
        self.strategy.stop().await;
        tracing::info!("Job queue service stopped");
    }
}

/// A registered queue, for adding jobs without repeating its name.
#[derive(Clone)]
pub struct JobQueue {
    name: String,
    service: Arc<JobQueueService>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("name", &self.name).finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add(
        &self,
        data: serde_json::Value,
        options: AddOptions,
    ) -> Result<JobHandle, QueueError> {
        self.service.add(&self.name, data, options).await
    }
}
