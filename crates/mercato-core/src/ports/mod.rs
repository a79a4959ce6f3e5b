//! Ports - trait definitions for the job queue's collaborators.
//! Infrastructure implements these; the domain only depends on them.

mod backoff;
mod catalog;
mod job_buffer;
mod job_store;
mod processor;

pub use backoff::{BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff};
pub use catalog::{CollectionFilterApplier, IndexingSummary, SearchIndexer};
pub use job_buffer::JobBuffer;
pub use job_store::{
    JobFilter, JobList, JobListOptions, JobSort, JobSortField, JobStore, QueueStats, SortOrder,
};
pub use processor::{
    JobContext, JobProcessor, ProcessFuture, ProgressReporter, ProgressSink, job_processor,
};
