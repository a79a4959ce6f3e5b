//! Job buffer port - coalesces bursts of similar jobs before they are stored.

use crate::domain::Job;

/// A buffer collects not-yet-persisted jobs during a quiescence window and
/// reduces them to fewer jobs when the window closes.
pub trait JobBuffer: Send + Sync {
    /// Stable identifier, used for targeted flushes and logging.
    fn id(&self) -> &str;

    /// Whether this buffer takes the job.
    fn collect(&self, job: &Job) -> bool;

    /// Merge everything collected in one window. Called once per window
    /// with at least one job.
    fn reduce(&self, collected: Vec<Job>) -> Vec<Job>;
}
