use std::path::PathBuf;

use crate::vector_db::{Backend, ItemHandle};

pub type Result<T> = std::result::Result<T, SimilarityError>;

#[derive(Debug, thiserror::Error)]
pub enum SimilarityError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unknown handle: {0}")]
    UnknownHandle(ItemHandle),

    #[error("Unknown external id: {0}")]
    UnknownExternalId(String),

    #[error("Embedding for {external_id} has a non-finite component at position {position}")]
    NonFiniteEmbedding { external_id: String, position: usize },

    #[error("Length mismatch: {what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Storage corruption in {path:?}: {reason}")]
    StorageCorruption { path: PathBuf, reason: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(Backend),

    #[error("Metadata store is closed")]
    StoreClosed,

    #[error("Failed to decode image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage engine error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimilarityError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StorageCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
