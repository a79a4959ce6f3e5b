//! # Mercato Infrastructure
//!
//! Concrete implementations of the ports defined in `mercato-core`, plus the
//! polling strategy, job buffering and the queue service built on them.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory store only
//! - `sql` - Postgres and SQLite job stores via SeaORM

pub mod buffer;
pub mod polling;
pub mod processors;
pub mod queue;
pub mod store;

#[cfg(feature = "sql")]
pub mod database;

// Re-exports - In-Memory
pub use buffer::{COLLECTION_BUFFER_ID, CollectionJobBuffer, JobBufferService};
pub use polling::{PollingConfig, PollingQueueStrategy};
pub use processors::{collection_filters_processor, search_index_processor};
pub use queue::{AddOptions, JobHandle, JobQueue, JobQueueService, QueueServiceConfig};
pub use store::{InMemoryJobStore, PayloadLimits};

// Re-exports - SQL
#[cfg(feature = "sql")]
pub use database::{DatabaseConfig, SqlJobStore};
