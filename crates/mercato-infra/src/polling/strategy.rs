use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use mercato_core::ports::{JobContext, JobProcessor, JobStore, ProgressReporter};
use mercato_core::{Job, JobState, JobStateError, QueueError, StoreError};

use super::PollingConfig;
use super::progress::ProgressWriter;

/// Delay between attempts to persist a job outcome while the store is down.
const SETTLE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Claim one job of `queue_name`, run it, and persist the outcome.
///
/// Returns the job as persisted after processing, or `None` if nothing was
/// claimable. Processor errors and panics are recorded on the job; only
/// store failures are returned. An outcome that cannot be written because
/// the store went away is retried until the store returns.
pub async fn process_next(
    store: &Arc<dyn JobStore>,
    queue_name: &str,
    processor: &JobProcessor,
) -> Result<Option<Job>, QueueError> {
    let (_running, mut shutdown) = watch::channel(false);
    run_next(store, queue_name, processor, &mut shutdown).await
}

async fn run_next(
    store: &Arc<dyn JobStore>,
    queue_name: &str,
    processor: &JobProcessor,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<Job>, QueueError> {
    let Some(mut job) = store.claim_next(queue_name).await? else {
        return Ok(None);
    };
    let id = job.id().ok_or(StoreError::NotPersisted)?;
    tracing::debug!(
        job_id = %id,
        queue = %queue_name,
        attempt = job.attempts(),
        "Job claimed"
    );

    let writer = ProgressWriter::spawn(store.clone(), id);
    let ctx = JobContext::new(job.clone(), ProgressReporter::new(writer.sink()));
    let processor = processor.clone();
    let outcome = AssertUnwindSafe(async move { processor(ctx).await })
        .catch_unwind()
        .await;

    if let Some(progress) = writer.finish().await {
        job.set_progress(progress as i64)?;
    }

    match outcome {
        Ok(Ok(result)) => {
            job.complete(result)?;
            tracing::debug!(
                job_id = %id,
                queue = %queue_name,
                duration_ms = job.duration().map(|d| d.num_milliseconds()),
                "Job completed"
            );
        }
        Ok(Err(err)) => record_failure(&mut job, err.message)?,
        Err(panic) => {
            let message = format!("Processor panicked: {}", panic_message(panic.as_ref()));
            // The failure itself is reported by record_failure.
            tracing::warn!(job_id = %id, queue = %queue_name, panic = %message, "Processor panicked");
            record_failure(&mut job, message)?;
        }
    }

    persist_outcome(store, &job, shutdown).await?;
    Ok(Some(job))
}

/// Write the processed job back, waiting out store outages.
///
/// Gives up only when shutdown is requested; the job then stays RUNNING
/// until the stale sweep requeues it.
async fn persist_outcome(
    store: &Arc<dyn JobStore>,
    job: &Job,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), QueueError> {
    let id = job.id().map(|id| id.0);
    loop {
        let err = match store.update(job).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_unavailable() => e,
            Err(e) => return Err(e.into()),
        };

        if *shutdown.borrow() {
            tracing::warn!(
                job_id = id,
                queue = %job.queue_name(),
                state = %job.state(),
                "Shutting down before the job outcome was persisted"
            );
            return Err(err.into());
        }
        tracing::debug!(job_id = id, queue = %job.queue_name(), "Job store unavailable, retrying outcome");

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Err(err.into());
                }
            }
            _ = tokio::time::sleep(SETTLE_RETRY_INTERVAL) => {}
        }
    }
}

fn record_failure(job: &mut Job, message: String) -> Result<(), JobStateError> {
    job.fail(message)?;
    let id = job.id().map(|id| id.0);
    if job.state() == JobState::Retrying {
        tracing::warn!(
            job_id = id,
            queue = %job.queue_name(),
            attempt = job.attempts(),
            retries = job.retries(),
            error = job.error().unwrap_or_default(),
            "Job failed, will retry"
        );
    } else {
        tracing::error!(
            job_id = id,
            queue = %job.queue_name(),
            attempts = job.attempts(),
            error = job.error().unwrap_or_default(),
            "Job failed"
        );
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Exclusive claim right on a single-writer store.
///
/// Taken on the first start when the store is reachable, otherwise by the
/// first poll after it becomes reachable. A store that only turns out to be
/// single-writer once a connection is attached is covered the same way.
struct WorkerLease {
    store: Arc<dyn JobStore>,
    worker_id: String,
    ttl: Duration,
    held: AtomicBool,
}

impl WorkerLease {
    /// Ok when this process may claim from the store.
    async fn ensure(&self) -> Result<(), StoreError> {
        if self.held.load(Ordering::SeqCst) || !self.store.single_writer() {
            return Ok(());
        }
        self.store
            .acquire_worker_lease(&self.worker_id, self.ttl)
            .await?;
        if !self.held.swap(true, Ordering::SeqCst) {
            tracing::info!(worker = %self.worker_id, "Worker lease acquired");
        }
        Ok(())
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        if !self.held.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.store
            .acquire_worker_lease(&self.worker_id, self.ttl)
            .await
    }

    async fn release(&self) {
        if !self.held.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.store.release_worker_lease(&self.worker_id).await {
            tracing::warn!(error = %e, "Failed to release worker lease");
        }
    }
}

#[derive(Default)]
struct LoopState {
    loops: HashMap<String, JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Runs an independent poll loop for every started queue.
///
/// The loops share nothing but the store; a slow processor delays only its
/// own queue. Within a queue jobs run one at a time per process.
pub struct PollingQueueStrategy {
    store: Arc<dyn JobStore>,
    config: PollingConfig,
    lease: Arc<WorkerLease>,
    shutdown: Arc<watch::Sender<bool>>,
    state: Mutex<LoopState>,
}

impl PollingQueueStrategy {
    pub fn new(store: Arc<dyn JobStore>, config: PollingConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let lease = Arc::new(WorkerLease {
            store: store.clone(),
            worker_id: config.worker_id.clone(),
            ttl: config.lease_ttl,
            held: AtomicBool::new(false),
        });
        Self {
            store,
            config,
            lease,
            shutdown: Arc::new(shutdown),
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn is_active(&self, queue_name: &str) -> bool {
        self.config.is_active(queue_name)
    }

    /// Start polling `queue_name`. Returns `false` if the queue is not
    /// active in this process or is already being polled.
    ///
    /// On a single-writer store the worker lease is taken before any claim,
    /// and starting fails with [`StoreError::LeaseHeld`] if another process
    /// holds it. While the store is unreachable the lease is deferred to the
    /// first poll that finds it back.
    pub async fn start(
        &self,
        queue_name: &str,
        processor: JobProcessor,
    ) -> Result<bool, StoreError> {
        if !self.is_active(queue_name) {
            tracing::debug!(queue = %queue_name, "Queue not active in this process, not polling");
            return Ok(false);
        }

        let mut state = self.state.lock().await;
        if state.loops.contains_key(queue_name) {
            tracing::warn!(queue = %queue_name, "Queue is already being polled");
            return Ok(false);
        }

        match self.lease.ensure().await {
            Ok(()) => {}
            Err(e) if e.is_unavailable() => {
                tracing::warn!(queue = %queue_name, "Job store unavailable, worker lease deferred");
            }
            Err(e) => return Err(e),
        }
        if state.heartbeat.is_none() {
            state.heartbeat = Some(self.spawn_heartbeat());
        }

        let handle = tokio::spawn(poll_loop(
            self.store.clone(),
            self.lease.clone(),
            queue_name.to_string(),
            processor,
            self.config.poll_interval,
            self.shutdown.clone(),
        ));
        state.loops.insert(queue_name.to_string(), handle);

        tracing::info!(
            queue = %queue_name,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Polling started"
        );
        Ok(true)
    }

    /// Names of the queues currently polled.
    pub async fn polled_queues(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.loops.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every loop, waiting for in-flight jobs to settle, and release
    /// the worker lease. The strategy cannot be restarted.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let mut state = self.state.lock().await;

        for (queue, handle) in state.loops.drain() {
            if let Err(e) = handle.await {
                tracing::warn!(queue = %queue, error = %e, "Poll loop ended abnormally");
            }
        }
        if let Some(heartbeat) = state.heartbeat.take() {
            let _ = heartbeat.await;
        }
        self.lease.release().await;
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let lease = self.lease.clone();
        let every = (lease.ttl / 3).max(Duration::from_secs(1));
        let shutdown_tx = self.shutdown.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(every) => {}
                }
                if *shutdown.borrow() {
                    break;
                }

                match lease.refresh().await {
                    Ok(()) => {}
                    Err(StoreError::LeaseHeld { holder }) => {
                        tracing::error!(
                            worker = %lease.worker_id,
                            holder = %holder,
                            "Worker lease lost, stopping all polling"
                        );
                        lease.held.store(false, Ordering::SeqCst);
                        shutdown_tx.send_replace(true);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to refresh worker lease");
                    }
                }
            }
        })
    }
}

async fn poll_loop(
    store: Arc<dyn JobStore>,
    lease: Arc<WorkerLease>,
    queue_name: String,
    processor: JobProcessor,
    interval: Duration,
    shutdown_tx: Arc<watch::Sender<bool>>,
) {
    let mut shutdown = shutdown_tx.subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = match lease.ensure().await {
            Err(StoreError::LeaseHeld { holder }) => {
                tracing::error!(
                    worker = %lease.worker_id,
                    holder = %holder,
                    "Job store is leased by another worker, stopping all polling"
                );
                shutdown_tx.send_replace(true);
                break;
            }
            Err(e) => {
                tracing::debug!(queue = %queue_name, error = %e, "Worker lease not taken, skipping poll");
                false
            }
            Ok(()) => match run_next(&store, &queue_name, &processor, &mut shutdown).await {
                Ok(job) => job.is_some(),
                Err(QueueError::Store(e)) if e.is_unavailable() => {
                    tracing::debug!(queue = %queue_name, "Job store unavailable, skipping poll");
                    false
                }
                Err(e) => {
                    tracing::warn!(queue = %queue_name, error = %e, "Poll cycle failed");
                    false
                }
            },
        };

        // Keep draining while there is work.
        if claimed {
            continue;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!(queue = %queue_name, "Polling stopped");
}
