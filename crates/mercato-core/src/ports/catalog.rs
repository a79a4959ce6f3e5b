//! Catalog collaborators invoked by the built-in queues.
//!
//! How an index document is built or how a collection filter is evaluated
//! lives outside the job queue; processors only route work to these traits.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::payload::{EntityId, SerializedContext};
use crate::error::ProcessorError;
use crate::ports::ProgressReporter;

/// Outcome of a bulk indexing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexingSummary {
    pub indexed_item_count: u64,
    pub time_taken: Duration,
}

/// Search index maintenance.
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    async fn reindex(
        &self,
        ctx: &SerializedContext,
        progress: &ProgressReporter,
    ) -> Result<IndexingSummary, ProcessorError>;

    async fn update_product(
        &self,
        ctx: &SerializedContext,
        product_id: &EntityId,
    ) -> Result<(), ProcessorError>;

    async fn update_variants(
        &self,
        ctx: &SerializedContext,
        variant_ids: &[EntityId],
    ) -> Result<(), ProcessorError>;

    async fn delete_product(
        &self,
        ctx: &SerializedContext,
        product_id: &EntityId,
    ) -> Result<(), ProcessorError>;

    async fn delete_variants(
        &self,
        ctx: &SerializedContext,
        variant_ids: &[EntityId],
    ) -> Result<(), ProcessorError>;

    async fn update_variants_by_id(
        &self,
        ctx: &SerializedContext,
        ids: &[EntityId],
        progress: &ProgressReporter,
    ) -> Result<IndexingSummary, ProcessorError>;

    async fn update_asset(
        &self,
        ctx: &SerializedContext,
        asset: &serde_json::Value,
    ) -> Result<(), ProcessorError>;

    async fn delete_asset(
        &self,
        ctx: &SerializedContext,
        asset: &serde_json::Value,
    ) -> Result<(), ProcessorError>;

    async fn assign_product_to_channel(
        &self,
        ctx: &SerializedContext,
        product_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError>;

    async fn remove_product_from_channel(
        &self,
        ctx: &SerializedContext,
        product_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError>;

    async fn assign_variant_to_channel(
        &self,
        ctx: &SerializedContext,
        product_variant_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError>;

    async fn remove_variant_from_channel(
        &self,
        ctx: &SerializedContext,
        product_variant_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError>;
}

/// Collection filter evaluation.
#[async_trait]
pub trait CollectionFilterApplier: Send + Sync {
    /// Re-apply one collection's filters. Returns the ids of the variants
    /// whose membership changed, or `None` if the collection no longer exists.
    async fn apply_filters(
        &self,
        ctx: &SerializedContext,
        collection_id: &EntityId,
        changed_variants_only: bool,
    ) -> Result<Option<Vec<EntityId>>, ProcessorError>;
}
