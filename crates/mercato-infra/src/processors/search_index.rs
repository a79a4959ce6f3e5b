use std::sync::Arc;

use serde_json::json;

use mercato_core::ProcessorError;
use mercato_core::domain::payload::UpdateSearchIndexJob;
use mercato_core::ports::{IndexingSummary, JobContext, JobProcessor, SearchIndexer, job_processor};

/// Processor for the `update-search-index` queue.
///
/// Bulk operations (`reindex`, `update-variants-by-id`) report progress and
/// return an indexing summary; every other operation returns `true`.
pub fn search_index_processor(indexer: Arc<dyn SearchIndexer>) -> JobProcessor {
    job_processor(move |ctx: JobContext| {
        let indexer = indexer.clone();
        async move { process(indexer.as_ref(), &ctx).await }
    })
}

async fn process(
    indexer: &dyn SearchIndexer,
    job: &JobContext,
) -> Result<serde_json::Value, ProcessorError> {
    let data: UpdateSearchIndexJob = job.decode()?;
    tracing::debug!(
        job_id = ?job.job().id().map(|id| id.0),
        kind = data.kind(),
        "Processing search index job"
    );
    let progress = job.progress();

    match data {
        UpdateSearchIndexJob::Reindex { ctx } => {
            let summary = indexer.reindex(&ctx, &progress).await?;
            Ok(summary_value(summary))
        }
        UpdateSearchIndexJob::UpdateVariantsById { ctx, ids } => {
            let summary = indexer.update_variants_by_id(&ctx, &ids, &progress).await?;
            Ok(summary_value(summary))
        }
        UpdateSearchIndexJob::UpdateProduct { ctx, product_id } => {
            indexer.update_product(&ctx, &product_id).await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::UpdateVariants { ctx, variant_ids } => {
            indexer.update_variants(&ctx, &variant_ids).await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::DeleteProduct { ctx, product_id } => {
            indexer.delete_product(&ctx, &product_id).await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::DeleteVariant { ctx, variant_ids } => {
            indexer.delete_variants(&ctx, &variant_ids).await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::UpdateAsset { ctx, asset } => {
            indexer.update_asset(&ctx, &asset).await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::DeleteAsset { ctx, asset } => {
            indexer.delete_asset(&ctx, &asset).await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::AssignProductToChannel {
            ctx,
            product_id,
            channel_id,
        } => {
            indexer
                .assign_product_to_channel(&ctx, &product_id, &channel_id)
                .await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::RemoveProductFromChannel {
            ctx,
            product_id,
            channel_id,
        } => {
            indexer
                .remove_product_from_channel(&ctx, &product_id, &channel_id)
                .await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::AssignVariantToChannel {
            ctx,
            product_variant_id,
            channel_id,
        } => {
            indexer
                .assign_variant_to_channel(&ctx, &product_variant_id, &channel_id)
                .await?;
            Ok(json!(true))
        }
        UpdateSearchIndexJob::RemoveVariantFromChannel {
            ctx,
            product_variant_id,
            channel_id,
        } => {
            indexer
                .remove_variant_from_channel(&ctx, &product_variant_id, &channel_id)
                .await?;
            Ok(json!(true))
        }
    }
}

fn summary_value(summary: IndexingSummary) -> serde_json::Value {
    json!({
        "success": true,
        "indexedItemCount": summary.indexed_item_count,
        "timeTaken": summary.time_taken.as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use mercato_core::Job;
    use mercato_core::domain::payload::{EntityId, SerializedContext, UPDATE_SEARCH_INDEX_QUEUE};
    use mercato_core::ports::{ProgressReporter, ProgressSink};

    #[derive(Default)]
    struct RecordingIndexer {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingIndexer {
        fn record(&self, call: String) -> Result<(), ProcessorError> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl SearchIndexer for RecordingIndexer {
        async fn reindex(
            &self,
            _ctx: &SerializedContext,
            progress: &ProgressReporter,
        ) -> Result<IndexingSummary, ProcessorError> {
            for done in 1..=4 {
                progress.set_ratio(done, 4);
            }
            self.record("reindex".into())?;
            Ok(IndexingSummary {
                indexed_item_count: 4,
                time_taken: Duration::from_millis(12),
            })
        }

        async fn update_product(
            &self,
            _ctx: &SerializedContext,
            product_id: &EntityId,
        ) -> Result<(), ProcessorError> {
            self.record(format!("update_product {product_id}"))
        }

        async fn update_variants(
            &self,
            _ctx: &SerializedContext,
            variant_ids: &[EntityId],
        ) -> Result<(), ProcessorError> {
            self.record(format!("update_variants {}", variant_ids.len()))
        }

        async fn delete_product(
            &self,
            _ctx: &SerializedContext,
            product_id: &EntityId,
        ) -> Result<(), ProcessorError> {
            Err(ProcessorError::new(format!("product {product_id} is locked")))
        }

        async fn delete_variants(
            &self,
            _ctx: &SerializedContext,
            variant_ids: &[EntityId],
        ) -> Result<(), ProcessorError> {
            self.record(format!("delete_variants {}", variant_ids.len()))
        }

        async fn update_variants_by_id(
            &self,
            _ctx: &SerializedContext,
            ids: &[EntityId],
            _progress: &ProgressReporter,
        ) -> Result<IndexingSummary, ProcessorError> {
            self.record(format!("update_variants_by_id {}", ids.len()))?;
            Ok(IndexingSummary {
                indexed_item_count: ids.len() as u64,
                time_taken: Duration::from_millis(3),
            })
        }

        async fn update_asset(
            &self,
            _ctx: &SerializedContext,
            asset: &serde_json::Value,
        ) -> Result<(), ProcessorError> {
            self.record(format!("update_asset {}", asset["id"]))
        }

        async fn delete_asset(
            &self,
            _ctx: &SerializedContext,
            asset: &serde_json::Value,
        ) -> Result<(), ProcessorError> {
            self.record(format!("delete_asset {}", asset["id"]))
        }

        async fn assign_product_to_channel(
            &self,
            _ctx: &SerializedContext,
            product_id: &EntityId,
            channel_id: &EntityId,
        ) -> Result<(), ProcessorError> {
            self.record(format!("assign_product {product_id} -> {channel_id}"))
        }

        async fn remove_product_from_channel(
            &self,
            _ctx: &SerializedContext,
            product_id: &EntityId,
            channel_id: &EntityId,
        ) -> Result<(), ProcessorError> {
            self.record(format!("remove_product {product_id} <- {channel_id}"))
        }

        async fn assign_variant_to_channel(
            &self,
            _ctx: &SerializedContext,
            product_variant_id: &EntityId,
            channel_id: &EntityId,
        ) -> Result<(), ProcessorError> {
            self.record(format!("assign_variant {product_variant_id} -> {channel_id}"))
        }

        async fn remove_variant_from_channel(
            &self,
            _ctx: &SerializedContext,
            product_variant_id: &EntityId,
            channel_id: &EntityId,
        ) -> Result<(), ProcessorError> {
            self.record(format!("remove_variant {product_variant_id} <- {channel_id}"))
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<u8>>);

    impl ProgressSink for CollectingSink {
        fn report(&self, progress: u8) {
            self.0.lock().unwrap().push(progress);
        }
    }

    async fn run(
        indexer: &Arc<RecordingIndexer>,
        data: serde_json::Value,
        sink: Arc<CollectingSink>,
    ) -> Result<serde_json::Value, ProcessorError> {
        let processor = search_index_processor(indexer.clone());
        let job = Job::new(UPDATE_SEARCH_INDEX_QUEUE, data);
        processor(JobContext::new(job, ProgressReporter::new(sink))).await
    }

    #[tokio::test]
    async fn test_reindex_reports_progress_and_summary() {
        let indexer = Arc::new(RecordingIndexer::default());
        let sink = Arc::new(CollectingSink::default());

        let result = run(
            &indexer,
            serde_json::json!({ "type": "reindex", "ctx": {} }),
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(
            result,
            serde_json::json!({ "success": true, "indexedItemCount": 4, "timeTaken": 12 })
        );
        assert_eq!(*sink.0.lock().unwrap(), vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_routes_each_operation() {
        let indexer = Arc::new(RecordingIndexer::default());
        let payloads = [
            serde_json::json!({ "type": "update-product", "ctx": {}, "productId": 3 }),
            serde_json::json!({ "type": "update-variants", "ctx": {}, "variantIds": [1, 2] }),
            serde_json::json!({ "type": "delete-variant", "ctx": {}, "variantIds": [9] }),
            serde_json::json!({ "type": "update-asset", "ctx": {}, "asset": { "id": 5 } }),
            serde_json::json!({ "type": "delete-asset", "ctx": {}, "asset": { "id": 6 } }),
            serde_json::json!({
                "type": "assign-product-to-channel", "ctx": {}, "productId": 3, "channelId": "eu"
            }),
            serde_json::json!({
                "type": "remove-product-from-channel", "ctx": {}, "productId": 3, "channelId": "eu"
            }),
            serde_json::json!({
                "type": "assign-variant-to-channel", "ctx": {}, "productVariantId": 7, "channelId": 2
            }),
            serde_json::json!({
                "type": "remove-variant-from-channel", "ctx": {}, "productVariantId": 7, "channelId": 2
            }),
        ];
        for payload in payloads {
            let result = run(&indexer, payload, Arc::default()).await.unwrap();
            assert_eq!(result, serde_json::json!(true));
        }

        let summary = run(
            &indexer,
            serde_json::json!({ "type": "update-variants-by-id", "ctx": {}, "ids": [1, 2, 3] }),
            Arc::default(),
        )
        .await
        .unwrap();
        assert_eq!(summary["indexedItemCount"], 3);

        assert_eq!(
            *indexer.calls.lock().unwrap(),
            vec![
                "update_product 3",
                "update_variants 2",
                "delete_variants 1",
                "update_asset 5",
                "delete_asset 6",
                "assign_product 3 -> eu",
                "remove_product 3 <- eu",
                "assign_variant 7 -> 2",
                "remove_variant 7 <- 2",
                "update_variants_by_id 3",
            ]
        );
    }

    #[tokio::test]
    async fn test_indexer_errors_and_bad_payloads_fail_the_job() {
        let indexer = Arc::new(RecordingIndexer::default());

        let err = run(
            &indexer,
            serde_json::json!({ "type": "delete-product", "ctx": {}, "productId": 8 }),
            Arc::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.message, "product 8 is locked");

        let err = run(
            &indexer,
            serde_json::json!({ "type": "compact-index", "ctx": {} }),
            Arc::default(),
        )
        .await
        .unwrap_err();
        assert!(err.message.starts_with("Invalid job data"));
    }
}
