//! Processor port - the function a queue runs for each claimed job.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::domain::Job;
use crate::error::ProcessorError;

/// Future returned by a processor.
pub type ProcessFuture =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, ProcessorError>> + Send>>;

/// Processor function type registered per queue.
pub type JobProcessor = Arc<dyn Fn(JobContext) -> ProcessFuture + Send + Sync>;

/// Wrap an async function as a [`JobProcessor`].
pub fn job_processor<F, Fut>(f: F) -> JobProcessor
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ProcessorError>> + Send + 'static,
{
    Arc::new(move |ctx: JobContext| -> ProcessFuture { Box::pin(f(ctx)) })
}

/// Receives progress reports from a running processor.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: u8);
}

/// Cheap, cloneable handle a processor (or its collaborators) uses to report
/// progress. Reports are best-effort.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Report a percentage, clamped to 0..=100.
    pub fn set(&self, percent: i64) {
        if let Some(sink) = &self.sink {
            sink.report(percent.clamp(0, 100) as u8);
        }
    }

    /// Report `completed` out of `total` units, rounded up. An empty total
    /// counts as done.
    pub fn set_ratio(&self, completed: u64, total: u64) {
        if total == 0 {
            self.set(100);
        } else {
            self.set((completed.saturating_mul(100)).div_ceil(total) as i64);
        }
    }
}

/// What a processor receives: a snapshot of the claimed job plus a way to
/// report progress.
pub struct JobContext {
    job: Job,
    progress: ProgressReporter,
}

impl JobContext {
    pub fn new(job: Job, progress: ProgressReporter) -> Self {
        Self { job, progress }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn data(&self) -> &serde_json::Value {
        self.job.data()
    }

    /// Decode the payload, turning a shape mismatch into a processor error.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProcessorError> {
        Ok(self.job.data_as()?)
    }

    pub fn progress(&self) -> ProgressReporter {
        self.progress.clone()
    }

    pub fn set_progress(&self, percent: i64) {
        self.progress.set(percent);
    }
}
