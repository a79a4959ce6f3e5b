//! Coalesces bursts of collection-filter jobs into one.

use std::collections::HashSet;

use mercato_core::Job;
use mercato_core::domain::payload::{APPLY_COLLECTION_FILTERS_QUEUE, ApplyCollectionFiltersJob};
use mercato_core::ports::JobBuffer;

pub const COLLECTION_BUFFER_ID: &str = "search-plugin-apply-collection-filters";

/// Merges every `apply-collection-filters` job of a window into a single job
/// covering the union of their collections.
///
/// The context and retry count come from the first job. If any job asks for
/// a full re-apply (`applyToChangedVariantsOnly = false`), so does the merged
/// job.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectionJobBuffer;

impl JobBuffer for CollectionJobBuffer {
    fn id(&self) -> &str {
        COLLECTION_BUFFER_ID
    }

    fn collect(&self, job: &Job) -> bool {
        job.queue_name() == APPLY_COLLECTION_FILTERS_QUEUE
            && job.data_as::<ApplyCollectionFiltersJob>().is_ok()
    }

    fn reduce(&self, collected: Vec<Job>) -> Vec<Job> {
        let mut template: Option<&Job> = None;
        let mut merged: Option<ApplyCollectionFiltersJob> = None;
        let mut seen = HashSet::new();
        let mut passthrough = Vec::new();

        for job in &collected {
            let Ok(data) = job.data_as::<ApplyCollectionFiltersJob>() else {
                passthrough.push(job.clone());
                continue;
            };
            match merged.as_mut() {
                None => {
                    let mut first = data;
                    first.collection_ids.retain(|id| seen.insert(id.clone()));
                    template = Some(job);
                    merged = Some(first);
                }
                Some(merged) => {
                    for id in data.collection_ids {
                        if seen.insert(id.clone()) {
                            merged.collection_ids.push(id);
                        }
                    }
                    merged.apply_to_changed_variants_only &= data.apply_to_changed_variants_only;
                }
            }
        }

        let (Some(template), Some(merged)) = (template, merged) else {
            return collected;
        };
        let data = match serde_json::to_value(&merged) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Could not merge collection filter jobs");
                return collected;
            }
        };

        let mut job = template.to_request();
        job.set_data(data);
        let mut reduced = vec![job];
        reduced.extend(passthrough);
        reduced
    }
}
