//! Payloads carried by the built-in catalog queues.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Queue that keeps the search index in sync with catalog changes.
pub const UPDATE_SEARCH_INDEX_QUEUE: &str = "update-search-index";

/// Queue that re-applies collection filters to product variants.
pub const APPLY_COLLECTION_FILTERS_QUEUE: &str = "apply-collection-filters";

/// A request context serialized by the enqueuing side, replayed by the processor.
pub type SerializedContext = serde_json::Value;

/// Catalog entity id; numeric or string depending on the id strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Str(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "{}", id),
            EntityId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Int(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Str(id.to_string())
    }
}

/// Every kind of work the `update-search-index` queue carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum UpdateSearchIndexJob {
    Reindex {
        ctx: SerializedContext,
    },
    UpdateProduct {
        ctx: SerializedContext,
        product_id: EntityId,
    },
    UpdateVariants {
        ctx: SerializedContext,
        variant_ids: Vec<EntityId>,
    },
    DeleteProduct {
        ctx: SerializedContext,
        product_id: EntityId,
    },
    DeleteVariant {
        ctx: SerializedContext,
        variant_ids: Vec<EntityId>,
    },
    UpdateVariantsById {
        ctx: SerializedContext,
        ids: Vec<EntityId>,
    },
    UpdateAsset {
        ctx: SerializedContext,
        asset: serde_json::Value,
    },
    DeleteAsset {
        ctx: SerializedContext,
        asset: serde_json::Value,
    },
    AssignProductToChannel {
        ctx: SerializedContext,
        product_id: EntityId,
        channel_id: EntityId,
    },
    RemoveProductFromChannel {
        ctx: SerializedContext,
        product_id: EntityId,
        channel_id: EntityId,
    },
    AssignVariantToChannel {
        ctx: SerializedContext,
        product_variant_id: EntityId,
        channel_id: EntityId,
    },
    RemoveVariantFromChannel {
        ctx: SerializedContext,
        product_variant_id: EntityId,
        channel_id: EntityId,
    },
}

impl UpdateSearchIndexJob {
    /// The wire tag of this variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reindex { .. } => "reindex",
            Self::UpdateProduct { .. } => "update-product",
            Self::UpdateVariants { .. } => "update-variants",
            Self::DeleteProduct { .. } => "delete-product",
            Self::DeleteVariant { .. } => "delete-variant",
            Self::UpdateVariantsById { .. } => "update-variants-by-id",
            Self::UpdateAsset { .. } => "update-asset",
            Self::DeleteAsset { .. } => "delete-asset",
            Self::AssignProductToChannel { .. } => "assign-product-to-channel",
            Self::RemoveProductFromChannel { .. } => "remove-product-from-channel",
            Self::AssignVariantToChannel { .. } => "assign-variant-to-channel",
            Self::RemoveVariantFromChannel { .. } => "remove-variant-from-channel",
        }
    }
}

/// Payload of the `apply-collection-filters` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCollectionFiltersJob {
    pub ctx: SerializedContext,
    pub collection_ids: Vec<EntityId>,
    /// `false` re-evaluates every variant rather than only changed ones.
    #[serde(default = "default_changed_only")]
    pub apply_to_changed_variants_only: bool,
}

fn default_changed_only() -> bool {
    true
}
