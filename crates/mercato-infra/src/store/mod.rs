//! Job store implementations.

mod memory;
mod truncate;

pub use memory::InMemoryJobStore;
pub use truncate::PayloadLimits;

use std::time::Duration;

use chrono::{DateTime, Utc};
use mercato_core::ports::BackoffStrategy;
use mercato_core::{Job, JobState};

/// Error recorded on RUNNING jobs returned to the queue by a stale sweep.
pub const ABANDONED_JOB_ERROR: &str = "job abandoned by worker";

/// Whether a claimable job is past its backoff delay.
///
/// Only RETRYING jobs wait; the delay runs from the job's last update.
pub(crate) fn backoff_elapsed(
    backoff: Option<&dyn BackoffStrategy>,
    job: &Job,
    now: DateTime<Utc>,
) -> bool {
    if job.state() != JobState::Retrying {
        return true;
    }
    let Some(backoff) = backoff else {
        return true;
    };
    let delay = backoff.delay(job.queue_name(), job.attempts(), job);
    let elapsed = (now - job.updated_at()).to_std().unwrap_or(Duration::ZERO);
    elapsed >= delay
}
