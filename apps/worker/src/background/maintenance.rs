//! Housekeeping of the job table.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mercato_core::QueueError;
use mercato_infra::JobQueueService;

/// Delete jobs settled more than `days` days ago, across every queue.
pub async fn purge_settled(service: &JobQueueService, days: u32) -> Result<u64, QueueError> {
    let older_than = Utc::now() - chrono::Duration::days(i64::from(days));
    service.remove_settled(&[], Some(older_than)).await
}

/// Return RUNNING jobs whose worker stopped reporting to the queue.
///
/// A job counts as abandoned once its row has not been touched for
/// `timeout`. It goes back to RETRYING if it has retries left, FAILED
/// otherwise.
pub async fn sweep_stale(service: &JobQueueService, timeout: Duration) -> Result<u64, QueueError> {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    let older_than = Utc::now()
        .checked_sub_signed(timeout)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    let requeued = service.store().requeue_stale(older_than).await?;
    if requeued > 0 {
        tracing::warn!(requeued, older_than = %older_than, "Requeued stale jobs");
    }
    Ok(requeued)
}

/// Run a maintenance task and log its failure instead of propagating it.
pub async fn run_logged<F, Fut>(name: &'static str, service: Arc<JobQueueService>, task: F)
where
    F: FnOnce(Arc<JobQueueService>) -> Fut,
    Fut: Future<Output = Result<u64, QueueError>>,
{
    match task(service).await {
        Ok(count) => tracing::debug!(task = name, count, "Maintenance task finished"),
        Err(e) => tracing::error!(task = name, error = %e, "Maintenance task failed"),
    }
}
