//! Domain types shared by the similarity index and analyzers

use serde::{Deserialize, Serialize};

use crate::vector_db::{Backend, ItemHandle, Metric};

/// Arbitrary per-item metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One indexed item: handle plus external identifier (usually a file path)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub handle: ItemHandle,
    pub external_id: String,
    pub metadata: Metadata,
}

/// A ranked query hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub handle: ItemHandle,
    pub external_id: String,
    /// Score as produced by the metric (dot product or squared distance)
    pub raw_score: f32,
    /// Higher is more similar; within [0, 1] for cosine and euclidean
    pub similarity: f32,
    pub metadata: Metadata,
}

/// Representative first, followed by its matches
pub type DuplicateGroup = Vec<SimilarityResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub count: usize,
    pub dimensionality: usize,
    pub metric: Metric,
    pub backend: Backend,
}
