use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{JobStateError, UnknownJobState};

/// Store-assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Retrying,
    Failed,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Pending,
        JobState::Running,
        JobState::Completed,
        JobState::Retrying,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Retrying => "RETRYING",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states. A settled job is never claimed or updated again.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// States a poller may claim from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Retrying)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownJobState(s.to_string()))
    }
}

/// Durable shape of a job, as read from or written to a store.
///
/// Stores convert between this and their own row type; everything else works
/// with [`Job`], which only allows legal state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Option<JobId>,
    pub queue_name: String,
    pub data: serde_json::Value,
    pub state: JobState,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub retries: u32,
    pub attempts: u32,
}

impl JobRecord {
    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }
}

/// One unit of deferred work.
///
/// A `Job` is either a not-yet-persisted request (no id) or a transient
/// projection of a stored record used by one processing cycle. All mutation
/// is local; persistence is the store's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JobRecord", into = "JobRecord")]
pub struct Job {
    id: Option<JobId>,
    queue_name: String,
    data: serde_json::Value,
    state: JobState,
    progress: u8,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    retries: u32,
    attempts: u32,
}

impl Job {
    /// Create a new pending job for the given queue.
    pub fn new(queue_name: impl Into<String>, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            queue_name: queue_name.into(),
            data,
            state: JobState::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            settled_at: None,
            updated_at: now,
            retries: 0,
            attempts: 0,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Copy of this job's request (queue, data, retries) with no id or history.
    pub fn to_request(&self) -> Self {
        Self::new(self.queue_name.clone(), self.data.clone()).with_retries(self.retries)
    }

    pub fn id(&self) -> Option<JobId> {
        self.id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Decode the payload into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    pub fn set_data(&mut self, data: serde_json::Value) {
        self.data = data;
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.settled_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }

    /// Time spent running: until settlement, or until now if still running.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.settled_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }

    /// PENDING/RETRYING -> RUNNING, counting one more attempt.
    ///
    /// Calling this on a job that is already running is a no-op.
    pub fn start(&mut self) -> Result<(), JobStateError> {
        match self.state {
            JobState::Pending | JobState::Retrying => {
                self.state = JobState::Running;
                self.attempts += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
                Ok(())
            }
            JobState::Running => Ok(()),
            state => Err(JobStateError::new("start", state)),
        }
    }

    /// Record progress, clamped to 0..=100. Only valid while running.
    pub fn set_progress(&mut self, progress: i64) -> Result<(), JobStateError> {
        if self.state != JobState::Running {
            return Err(JobStateError::new("report progress on", self.state));
        }
        self.progress = progress.clamp(0, 100) as u8;
        Ok(())
    }

    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), JobStateError> {
        self.ensure_unsettled("complete")?;
        self.state = JobState::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.settled_at = Some(Utc::now());
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// While `attempts <= retries` the job is re-armed as RETRYING and stays
    /// unsettled; after that it settles as FAILED.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobStateError> {
        self.ensure_unsettled("fail")?;
        self.error = Some(error.into());
        if self.attempts <= self.retries {
            self.state = JobState::Retrying;
        } else {
            self.state = JobState::Failed;
            self.settled_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), JobStateError> {
        self.ensure_unsettled("cancel")?;
        self.state = JobState::Cancelled;
        self.settled_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_unsettled(&self, action: &'static str) -> Result<(), JobStateError> {
        if self.is_settled() {
            Err(JobStateError::new(action, self.state))
        } else {
            Ok(())
        }
    }
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            queue_name: record.queue_name,
            data: record.data,
            state: record.state,
            progress: record.progress.min(100),
            result: record.result,
            error: record.error,
            created_at: record.created_at,
            started_at: record.started_at,
            settled_at: record.settled_at,
            updated_at: record.updated_at,
            retries: record.retries,
            attempts: record.attempts,
        }
    }
}

impl From<Job> for JobRecord {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            queue_name: job.queue_name,
            data: job.data,
            state: job.state,
            progress: job.progress,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            settled_at: job.settled_at,
            updated_at: job.updated_at,
            retries: job.retries,
            attempts: job.attempts,
        }
    }
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        job.clone().into()
    }
}
