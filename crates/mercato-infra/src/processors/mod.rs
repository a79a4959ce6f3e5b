//! Processors for the built-in catalog queues.

mod collection_filters;
mod search_index;

pub use collection_filters::collection_filters_processor;
pub use search_index::search_index_processor;
