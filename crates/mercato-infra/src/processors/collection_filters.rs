use std::sync::Arc;

use serde_json::json;

use mercato_core::ProcessorError;
use mercato_core::domain::payload::ApplyCollectionFiltersJob;
use mercato_core::ports::{CollectionFilterApplier, JobContext, JobProcessor, job_processor};

/// Processor for the `apply-collection-filters` queue.
pub fn collection_filters_processor(applier: Arc<dyn CollectionFilterApplier>) -> JobProcessor {
    job_processor(move |ctx: JobContext| {
        let applier = applier.clone();
        async move { apply(applier.as_ref(), &ctx).await }
    })
}

async fn apply(
    applier: &dyn CollectionFilterApplier,
    job: &JobContext,
) -> Result<serde_json::Value, ProcessorError> {
    let data: ApplyCollectionFiltersJob = job.decode()?;
    let total = data.collection_ids.len() as u64;
    let progress = job.progress();
    let mut applied = 0u64;
    let mut changed_variants = 0usize;

    for (done, collection_id) in data.collection_ids.iter().enumerate() {
        match applier
            .apply_filters(&data.ctx, collection_id, data.apply_to_changed_variants_only)
            .await?
        {
            Some(changed) => {
                applied += 1;
                changed_variants += changed.len();
            }
            None => {
                tracing::warn!(
                    collection_id = %collection_id,
                    "Collection not found, skipping filter application"
                );
            }
        }
        progress.set_ratio(done as u64 + 1, total);
    }

    tracing::debug!(
        collections = applied,
        changed_variants,
        changed_only = data.apply_to_changed_variants_only,
        "Collection filters applied"
    );
    Ok(json!({
        "appliedCollectionCount": applied,
        "changedVariantCount": changed_variants,
    }))
}
