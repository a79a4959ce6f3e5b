//! Domain entities - the job and the payloads carried by built-in queues.

mod job;

pub mod payload;

pub use job::{Job, JobId, JobRecord, JobState};
