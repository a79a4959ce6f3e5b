//! Domain-level error types.

use thiserror::Error;

use crate::domain::{JobId, JobState};

/// Job store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing connection is not established. Callers on the poll path
    /// treat this as "try again next tick".
    #[error("Job store unavailable: connection not established")]
    Unavailable,

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job has not been persisted yet")]
    NotPersisted,

    #[error("Query execution failed: {0}")]
    Query(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Embedded job store is leased by worker {holder}")]
    LeaseHeld { holder: String },
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable)
    }
}

/// Job queue errors surfaced by the queue service.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{0}' already has a registered processor")]
    DuplicateQueueRegistration(String),

    #[error("Invalid queue name '{name}': {reason}")]
    InvalidQueueName { name: String, reason: &'static str },

    #[error("Job buffer was dropped before the job was flushed")]
    BufferDropped,

    /// `job_id` is `None` if the job was still buffered at the deadline.
    #[error("Timed out waiting for job to settle")]
    Timeout { job_id: Option<JobId> },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] JobStateError),
}

/// Attempted an illegal job state transition.
#[derive(Debug, Clone, Error)]
#[error("Cannot {action} a job in state {state}")]
pub struct JobStateError {
    pub action: &'static str,
    pub state: JobState,
}

impl JobStateError {
    pub fn new(action: &'static str, state: JobState) -> Self {
        Self { action, state }
    }
}

/// A persisted state string that does not name a known job state.
#[derive(Debug, Clone, Error)]
#[error("Unknown job state: {0}")]
pub struct UnknownJobState(pub String);

/// Failure reported by a queue processor.
///
/// This is recorded as the job's `error`; it never propagates out of the
/// polling loop.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProcessorError {
    pub message: String,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ProcessorError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProcessorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("Invalid job data: {err}"))
    }
}
