use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;

use mercato_core::ports::{JobBuffer, JobStore};
use mercato_core::{Job, JobId, StoreError};

/// Resolves to the id of the job a buffered request was merged into.
///
/// Fails with a receive error if the buffer was removed before flushing.
pub type BufferReceipt = oneshot::Receiver<Result<JobId, StoreError>>;

type Reply = oneshot::Sender<Result<JobId, StoreError>>;

enum Command {
    Collect(Job, Reply),
    Flush(oneshot::Sender<()>),
}

struct BufferSlot {
    buffer: Arc<dyn JobBuffer>,
    tx: mpsc::UnboundedSender<Command>,
    size: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

/// Routes new jobs through registered buffers.
///
/// Each buffer runs on its own task and flushes once no matching job has
/// arrived for `window` (a debounce, not a batch size). Flushed jobs go
/// straight to the store.
pub struct JobBufferService {
    store: Arc<dyn JobStore>,
    window: Duration,
    buffers: RwLock<Vec<BufferSlot>>,
}

impl JobBufferService {
    pub fn new(store: Arc<dyn JobStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            buffers: RwLock::new(Vec::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Register a buffer. Returns `false` if one with the same id exists.
    pub async fn add_buffer(&self, buffer: Arc<dyn JobBuffer>) -> bool {
        let mut buffers = self.buffers.write().await;
        if buffers.iter().any(|slot| slot.buffer.id() == buffer.id()) {
            tracing::warn!(buffer = %buffer.id(), "Job buffer already registered");
            return false;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let size = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(run_buffer(
            buffer.clone(),
            self.store.clone(),
            self.window,
            size.clone(),
            rx,
        ));
        tracing::debug!(buffer = %buffer.id(), "Job buffer registered");
        buffers.push(BufferSlot {
            buffer,
            tx,
            size,
            task,
        });
        true
    }

    /// Remove a buffer, discarding whatever it holds.
    pub async fn remove_buffer(&self, id: &str) -> bool {
        let mut buffers = self.buffers.write().await;
        let Some(index) = buffers.iter().position(|slot| slot.buffer.id() == id) else {
            return false;
        };
        let slot = buffers.remove(index);
        slot.task.abort();
        let discarded = slot.size.load(Ordering::SeqCst);
        if discarded > 0 {
            tracing::warn!(buffer = %id, discarded, "Removed job buffer with unflushed jobs");
        }
        true
    }

    /// Hand `job` to the first buffer that collects it, or give it back.
    pub async fn collect(&self, job: Job) -> Result<BufferReceipt, Job> {
        let buffers = self.buffers.read().await;
        let Some(slot) = buffers.iter().find(|slot| slot.buffer.collect(&job)) else {
            return Err(job);
        };

        let (reply, receipt) = oneshot::channel();
        slot.size.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(Command::Collect(job, _))) =
            slot.tx.send(Command::Collect(job, reply))
        {
            slot.size.fetch_sub(1, Ordering::SeqCst);
            return Err(job);
        }
        Ok(receipt)
    }

    /// Flush the given buffers (all if `None`) now, without waiting for
    /// their window to close.
    pub async fn flush(&self, buffer_ids: Option<&[String]>) {
        let mut pending = Vec::new();
        {
            let buffers = self.buffers.read().await;
            for slot in buffers.iter() {
                if buffer_ids.is_some_and(|ids| !ids.iter().any(|id| id == slot.buffer.id())) {
                    continue;
                }
                let (done, flushed) = oneshot::channel();
                if slot.tx.send(Command::Flush(done)).is_ok() {
                    pending.push(flushed);
                }
            }
        }
        for flushed in pending {
            let _ = flushed.await;
        }
    }

    /// Number of jobs currently held per buffer id.
    pub async fn buffer_sizes(&self) -> BTreeMap<String, usize> {
        self.buffers
            .read()
            .await
            .iter()
            .map(|slot| (slot.buffer.id().to_string(), slot.size.load(Ordering::SeqCst)))
            .collect()
    }
}

async fn run_buffer(
    buffer: Arc<dyn JobBuffer>,
    store: Arc<dyn JobStore>,
    window: Duration,
    size: Arc<AtomicUsize>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Vec<(Job, Reply)> = Vec::new();

    loop {
        let command = if pending.is_empty() {
            rx.recv().await
        } else {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    flush_pending(buffer.as_ref(), &store, &mut pending, &size).await;
                    continue;
                }
            }
        };

        match command {
            Some(Command::Collect(job, reply)) => pending.push((job, reply)),
            Some(Command::Flush(done)) => {
                if !pending.is_empty() {
                    flush_pending(buffer.as_ref(), &store, &mut pending, &size).await;
                }
                let _ = done.send(());
            }
            None => {
                if !pending.is_empty() {
                    flush_pending(buffer.as_ref(), &store, &mut pending, &size).await;
                }
                break;
            }
        }
    }
}

async fn flush_pending(
    buffer: &dyn JobBuffer,
    store: &Arc<dyn JobStore>,
    pending: &mut Vec<(Job, Reply)>,
    size: &AtomicUsize,
) {
    let (jobs, replies): (Vec<Job>, Vec<Reply>) = pending.drain(..).unzip();
    let collected = jobs.len();
    size.fetch_sub(collected, Ordering::SeqCst);

    let reduced = buffer.reduce(jobs);
    tracing::debug!(
        buffer = %buffer.id(),
        collected,
        reduced = reduced.len(),
        "Flushing job buffer"
    );

    let mut outcome: Option<Result<JobId, StoreError>> = None;
    for job in reduced {
        let queue = job.queue_name().to_string();
        let result = store
            .create(job)
            .await
            .and_then(|created| created.id().ok_or(StoreError::NotPersisted));
        match &result {
            Ok(id) => tracing::debug!(job_id = %id, queue = %queue, "Buffered job enqueued"),
            // No `queue` field: this is not a job failure.
            Err(e) => tracing::error!(
                buffer = %buffer.id(),
                target_queue = %queue,
                error = %e,
                "Failed to persist buffered job"
            ),
        }
        if outcome.as_ref().is_none_or(|o| o.is_err() && result.is_ok()) {
            outcome = Some(result);
        }
    }

    if let Some(outcome) = outcome {
        for reply in replies {
            let _ = reply.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use mercato_core::ports::JobListOptions;
    use serde_json::json;
    use tokio::time::Instant;

    use crate::store::InMemoryJobStore;

    /// Merges every "ping" job into one carrying the summed counts.
    #[derive(Default)]
    struct SummingBuffer {
        reductions: Mutex<Vec<(usize, Instant)>>,
    }

    impl JobBuffer for SummingBuffer {
        fn id(&self) -> &str {
            "summing"
        }

        fn collect(&self, job: &Job) -> bool {
            job.queue_name() == "ping"
        }

        fn reduce(&self, collected: Vec<Job>) -> Vec<Job> {
            self.reductions
                .lock()
                .unwrap()
                .push((collected.len(), Instant::now()));
            let total: i64 = collected
                .iter()
                .map(|j| j.data()["count"].as_i64().unwrap_or(0))
                .sum();
            vec![Job::new("ping", json!({ "count": total }))]
        }
    }

    fn ping(count: i64) -> Job {
        Job::new("ping", json!({ "count": count }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_reduces_once_after_quiet_window() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let service = JobBufferService::new(store.clone(), Duration::from_millis(50));
        let buffer = Arc::new(SummingBuffer::default());
        service.add_buffer(buffer.clone()).await;

        let first = service.collect(ping(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _second = service.collect(ping(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let last_arrival = Instant::now();
        let _third = service.collect(ping(3)).await.unwrap();

        assert_eq!(service.buffer_sizes().await["summing"], 3);

        let id = first.await.unwrap().unwrap();

        let reductions = buffer.reductions.lock().unwrap().clone();
        assert_eq!(reductions.len(), 1);
        assert_eq!(reductions[0].0, 3);
        assert_eq!(reductions[0].1 - last_arrival, Duration::from_millis(50));

        let stored = store.find_one(id).await.unwrap().unwrap();
        assert_eq!(stored.data()["count"], 6);
        assert_eq!(service.buffer_sizes().await["summing"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_matching_jobs_are_returned() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let service = JobBufferService::new(store, Duration::from_millis(50));
        service.add_buffer(Arc::new(SummingBuffer::default())).await;
        assert!(!service.add_buffer(Arc::new(SummingBuffer::default())).await);

        let job = service.collect(Job::new("mail", json!({}))).await.unwrap_err();
        assert_eq!(job.queue_name(), "mail");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_skips_the_window() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let service = JobBufferService::new(store.clone(), Duration::from_secs(3600));
        service.add_buffer(Arc::new(SummingBuffer::default())).await;

        let receipt = service.collect(ping(4)).await.unwrap();
        service.collect(ping(5)).await.unwrap();
        let started = Instant::now();
        service.flush(Some(&["summing".to_string()])).await;

        assert_eq!(Instant::now(), started);
        assert!(receipt.await.unwrap().is_ok());
        let jobs = store.find_many(&JobListOptions::default()).await.unwrap();
        assert_eq!(jobs.total_items, 1);
        assert_eq!(jobs.items[0].data()["count"], 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_buffer_drops_receipts() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let service = JobBufferService::new(store.clone(), Duration::from_secs(3600));
        service.add_buffer(Arc::new(SummingBuffer::default())).await;

        let receipt = service.collect(ping(1)).await.unwrap();
        tokio::task::yield_now().await;
        assert!(service.remove_buffer("summing").await);

        assert!(receipt.await.is_err());
        assert_eq!(store.stats(None).await.unwrap().total(), 0);
    }
}
