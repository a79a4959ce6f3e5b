use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use mercato_core::ports::JobStore;
use mercato_core::{Job, JobId, JobState, QueueError, StoreError};

use crate::buffer::BufferReceipt;

enum Pending {
    Persisted(JobId),
    Buffered(BufferReceipt),
}

/// Observes one enqueued job.
///
/// Dropping the handle has no effect on the job. Every read goes to the
/// store, so a handle never influences which poller claims the job or when.
pub struct JobHandle {
    store: Arc<dyn JobStore>,
    pending: Pending,
    poll_interval: Duration,
}

impl JobHandle {
    pub(crate) fn persisted(store: Arc<dyn JobStore>, id: JobId, poll_interval: Duration) -> Self {
        Self {
            store,
            pending: Pending::Persisted(id),
            poll_interval,
        }
    }

    pub(crate) fn buffered(
        store: Arc<dyn JobStore>,
        receipt: BufferReceipt,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            pending: Pending::Buffered(receipt),
            poll_interval,
        }
    }

    /// The job id, once known. `None` while the job sits in a buffer.
    pub fn id(&self) -> Option<JobId> {
        match self.pending {
            Pending::Persisted(id) => Some(id),
            Pending::Buffered(_) => None,
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.pending, Pending::Buffered(_))
    }

    /// Wait until the job has an id. A buffered job resolves to the first
    /// job its buffer flushed it into.
    pub async fn resolve_id(&mut self) -> Result<JobId, QueueError> {
        let receipt = match &mut self.pending {
            Pending::Persisted(id) => return Ok(*id),
            Pending::Buffered(receipt) => receipt,
        };
        let id = match receipt.await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(QueueError::Store(e)),
            Err(_) => return Err(QueueError::BufferDropped),
        };
        self.pending = Pending::Persisted(id);
        Ok(id)
    }

    /// Current stored state of the job.
    pub async fn current(&mut self) -> Result<Job, QueueError> {
        let id = self.resolve_id().await?;
        self.store
            .find_one(id)
            .await?
            .ok_or(QueueError::Store(StoreError::NotFound(id)))
    }

    /// Snapshots of the job each time its state or progress changes, polled
    /// every `interval`. Ends after the first settled snapshot or the first
    /// error.
    pub fn updates(self, interval: Duration) -> impl Stream<Item = Result<Job, QueueError>> + Send {
        futures::stream::unfold(
            Some((self, None::<(JobState, u8)>)),
            move |state| async move {
                let Some((mut handle, last)) = state else {
                    return None;
                };
                loop {
                    match handle.current().await {
                        Err(e) => return Some((Err(e), None)),
                        Ok(job) => {
                            let seen = (job.state(), job.progress());
                            if last != Some(seen) {
                                let next = if job.is_settled() {
                                    None
                                } else {
                                    Some((handle, Some(seen)))
                                };
                                return Some((Ok(job), next));
                            }
                        }
                    }
                    tokio::time::sleep(interval).await;
                }
            },
        )
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// The timeout covers the time spent in a buffer as well.
    pub async fn wait_for_settlement(&mut self, timeout: Duration) -> Result<Job, QueueError> {
        let poll_interval = self.poll_interval;
        let waited = tokio::time::timeout(timeout, async {
            loop {
                match self.current().await {
                    Ok(job) if !job.is_settled() => {}
                    settled_or_failed => return settled_or_failed,
                }
                tokio::time::sleep(poll_interval).await;
            }
        })
        .await;

        match waited {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::Timeout { job_id: self.id() }),
        }
    }
}
