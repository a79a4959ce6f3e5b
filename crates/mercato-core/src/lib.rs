//! # Mercato Core
//!
//! The domain layer of the Mercato background job queue.
//! This crate contains the job state machine, the job payload types and the
//! ports that storage, buffering and processing adapters implement. It has
//! zero infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use domain::{Job, JobId, JobRecord, JobState};
pub use error::{JobStateError, ProcessorError, QueueError, StoreError};
