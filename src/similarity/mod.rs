//! Item-level similarity search and collection analysis
//!
//! [`SimilarityIndex`] pairs a vector backend with external ids and metadata;
//! [`DuplicateAnalyzer`] runs whole-collection passes on top of it;
//! [`MetadataStore`] keeps raw embeddings durable so an index can be rebuilt.

pub mod duplicates;
pub mod histogram;
pub mod index;
pub mod sidecar;
pub mod store;
pub mod types;

pub use duplicates::{AnalyzerConfig, DuplicateAnalyzer, DEFAULT_DUPLICATE_THRESHOLD};
pub use histogram::{
    color_histogram, histogram_distance, ColorHistogram, FileImageDecoder, ImageDecoder,
};
pub use index::SimilarityIndex;
pub use store::{MetadataStore, StoredEmbedding};
pub use types::{DuplicateGroup, IndexStatistics, ItemRecord, Metadata, SimilarityResult};
