//! Similarity search and duplicate/variant detection for image embeddings
//!
//! ```no_run
//! use texture_similarity::{Backend, DuplicateAnalyzer, Metric, SimilarityIndex};
//!
//! # fn main() -> texture_similarity::Result<()> {
//! let index = SimilarityIndex::create(4, Metric::Cosine, Backend::Flat)?;
//! index.add_embedding(&[1.0, 0.0, 0.0, 0.0], "a.png", None)?;
//! index.add_embedding(&[1.0, 0.0, 0.0, 0.001], "a2.png", None)?;
//!
//! let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 5, None)?;
//! let groups = DuplicateAnalyzer::new(&index).find_exact_duplicates(0.999)?;
//! # let _ = (hits, groups);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod similarity;
pub mod tracing_setup;
pub mod vector_db;

pub use config::EngineConfig;
pub use error::{Result, SimilarityError};
pub use similarity::{
    AnalyzerConfig, DuplicateAnalyzer, DuplicateGroup, IndexStatistics, ItemRecord, Metadata,
    MetadataStore, SimilarityIndex, SimilarityResult,
};
pub use vector_db::{Backend, IndexConfig, ItemHandle, Metric, VamanaConfig, VectorIndex};
