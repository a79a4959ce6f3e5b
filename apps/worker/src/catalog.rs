//! Catalog queues of the worker.
//!
//! The worker owns the queues but not the catalog itself. Until a search
//! backend is wired in, the collaborators here log each requested operation
//! and report it as done.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use mercato_core::domain::payload::{
    APPLY_COLLECTION_FILTERS_QUEUE, EntityId, SerializedContext, UPDATE_SEARCH_INDEX_QUEUE,
};
use mercato_core::ports::{CollectionFilterApplier, IndexingSummary, ProgressReporter, SearchIndexer};
use mercato_core::{ProcessorError, QueueError};
use mercato_infra::{
    CollectionJobBuffer, JobQueueService, collection_filters_processor, search_index_processor,
};

/// Register the catalog queues and, if enabled, the collection job buffer.
pub async fn register_queues(
    service: &Arc<JobQueueService>,
    buffer_collections: bool,
) -> Result<(), QueueError> {
    service
        .create_queue(
            UPDATE_SEARCH_INDEX_QUEUE,
            search_index_processor(Arc::new(LoggingSearchIndexer)),
        )
        .await?;
    service
        .create_queue(
            APPLY_COLLECTION_FILTERS_QUEUE,
            collection_filters_processor(Arc::new(LoggingCollectionFilterApplier)),
        )
        .await?;

    if buffer_collections {
        service.add_buffer(Arc::new(CollectionJobBuffer)).await;
    }
    Ok(())
}

fn summary(items: usize, started: Instant) -> IndexingSummary {
    IndexingSummary {
        indexed_item_count: items as u64,
        time_taken: started.elapsed(),
    }
}

pub struct LoggingSearchIndexer;

#[async_trait]
impl SearchIndexer for LoggingSearchIndexer {
    async fn reindex(
        &self,
        ctx: &SerializedContext,
        progress: &ProgressReporter,
    ) -> Result<IndexingSummary, ProcessorError> {
        let started = Instant::now();
        tracing::info!(ctx = %ctx, "Reindex requested");
        progress.set(100);
        Ok(summary(0, started))
    }

    async fn update_product(
        &self,
        _ctx: &SerializedContext,
        product_id: &EntityId,
    ) -> Result<(), ProcessorError> {
        tracing::info!(product_id = %product_id, "Product index update requested");
        Ok(())
    }

    async fn update_variants(
        &self,
        _ctx: &SerializedContext,
        variant_ids: &[EntityId],
    ) -> Result<(), ProcessorError> {
        tracing::info!(variants = variant_ids.len(), "Variant index update requested");
        Ok(())
    }

    async fn delete_product(
        &self,
        _ctx: &SerializedContext,
        product_id: &EntityId,
    ) -> Result<(), ProcessorError> {
        tracing::info!(product_id = %product_id, "Product index removal requested");
        Ok(())
    }

    async fn delete_variants(
        &self,
        _ctx: &SerializedContext,
        variant_ids: &[EntityId],
    ) -> Result<(), ProcessorError> {
        tracing::info!(variants = variant_ids.len(), "Variant index removal requested");
        Ok(())
    }

    async fn update_variants_by_id(
        &self,
        _ctx: &SerializedContext,
        ids: &[EntityId],
        progress: &ProgressReporter,
    ) -> Result<IndexingSummary, ProcessorError> {
        let started = Instant::now();
        for (done, id) in ids.iter().enumerate() {
            tracing::debug!(variant_id = %id, "Variant index update requested");
            progress.set_ratio(done as u64 + 1, ids.len() as u64);
        }
        Ok(summary(ids.len(), started))
    }

    async fn update_asset(
        &self,
        _ctx: &SerializedContext,
        asset: &serde_json::Value,
    ) -> Result<(), ProcessorError> {
        tracing::info!(asset_id = %asset["id"], "Asset index update requested");
        Ok(())
    }

    async fn delete_asset(
        &self,
        _ctx: &SerializedContext,
        asset: &serde_json::Value,
    ) -> Result<(), ProcessorError> {
        tracing::info!(asset_id = %asset["id"], "Asset index removal requested");
        Ok(())
    }

    async fn assign_product_to_channel(
        &self,
        _ctx: &SerializedContext,
        product_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError> {
        tracing::info!(product_id = %product_id, channel_id = %channel_id, "Product channel assignment requested");
        Ok(())
    }

    async fn remove_product_from_channel(
        &self,
        _ctx: &SerializedContext,
        product_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError> {
        tracing::info!(product_id = %product_id, channel_id = %channel_id, "Product channel removal requested");
        Ok(())
    }

    async fn assign_variant_to_channel(
        &self,
        _ctx: &SerializedContext,
        product_variant_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError> {
        tracing::info!(variant_id = %product_variant_id, channel_id = %channel_id, "Variant channel assignment requested");
        Ok(())
    }

    async fn remove_variant_from_channel(
        &self,
        _ctx: &SerializedContext,
        product_variant_id: &EntityId,
        channel_id: &EntityId,
    ) -> Result<(), ProcessorError> {
        tracing::info!(variant_id = %product_variant_id, channel_id = %channel_id, "Variant channel removal requested");
        Ok(())
    }
}

pub struct LoggingCollectionFilterApplier;

#[async_trait]
impl CollectionFilterApplier for LoggingCollectionFilterApplier {
    async fn apply_filters(
        &self,
        _ctx: &SerializedContext,
        collection_id: &EntityId,
        changed_variants_only: bool,
    ) -> Result<Option<Vec<EntityId>>, ProcessorError> {
        tracing::info!(
            collection_id = %collection_id,
            changed_variants_only,
            "Collection filter application requested"
        );
        Ok(Some(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mercato_infra::{AddOptions, InMemoryJobStore, PollingConfig, QueueServiceConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_catalog_queues_process_jobs() {
        let config = QueueServiceConfig {
            polling: PollingConfig {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        };
        let service = Arc::new(JobQueueService::new(
            Arc::new(InMemoryJobStore::new()),
            config,
        ));
        register_queues(&service, true).await.unwrap();
        assert_eq!(
            service.queue_names().await,
            vec![APPLY_COLLECTION_FILTERS_QUEUE, UPDATE_SEARCH_INDEX_QUEUE]
        );

        let mut reindex = service
            .add(
                UPDATE_SEARCH_INDEX_QUEUE,
                json!({ "type": "reindex", "ctx": {} }),
                AddOptions::default(),
            )
            .await
            .unwrap();
        let mut filters = service
            .add(
                APPLY_COLLECTION_FILTERS_QUEUE,
                json!({ "ctx": {}, "collectionIds": [1, 2] }),
                AddOptions::default(),
            )
            .await
            .unwrap();
        assert!(filters.is_buffered());

        let done = reindex
            .wait_for_settlement(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.result().unwrap()["indexedItemCount"], 0);

        let done = filters
            .wait_for_settlement(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.result().unwrap()["appliedCollectionCount"], 2);

        service.stop().await;
    }
}
