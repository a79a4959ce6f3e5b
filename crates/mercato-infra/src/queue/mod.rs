//! Queue service façade - registration, enqueueing and administration.

mod handle;
mod service;

pub use handle::JobHandle;
pub use service::{AddOptions, JobQueue, JobQueueService, QueueServiceConfig, validate_queue_name};
