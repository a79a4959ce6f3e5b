//! Job buffering - coalescing of near-simultaneous jobs before persistence.

mod collection;
mod service;

pub use collection::{COLLECTION_BUFFER_ID, CollectionJobBuffer};
pub use service::{BufferReceipt, JobBufferService};
