//! Sidecar record persisted next to the vector payload
//!
//! `<base>.index` holds the binary vector payload, `<base>.meta` holds this
//! JSON record: item identifiers and metadata in handle order plus the index
//! configuration. Both files must agree for a load to succeed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::types::Metadata;
use crate::error::{Result, SimilarityError};
use crate::vector_db::{Backend, Metric};

pub const SIDECAR_VERSION: u32 = 1;

const PAYLOAD_EXTENSION: &str = "index";
const SIDECAR_EXTENSION: &str = "meta";

pub fn payload_path(base: &Path) -> PathBuf {
    base.with_extension(PAYLOAD_EXTENSION)
}

pub fn sidecar_path(base: &Path) -> PathBuf {
    base.with_extension(SIDECAR_EXTENSION)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sidecar {
    pub format_version: u32,
    pub item_count: usize,
    pub dimensionality: usize,
    pub metric: Metric,
    pub backend: Backend,
    pub external_ids: Vec<String>,
    pub metadata: Vec<Metadata>,
}

impl Sidecar {
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read and validate internal consistency
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SimilarityError::corruption(path, "sidecar not found"));
        }
        let bytes = std::fs::read(path)?;
        let sidecar: Sidecar = serde_json::from_slice(&bytes)
            .map_err(|e| SimilarityError::corruption(path, format!("unreadable sidecar: {e}")))?;

        if sidecar.format_version != SIDECAR_VERSION {
            return Err(SimilarityError::corruption(
                path,
                format!("unsupported sidecar version {}", sidecar.format_version),
            ));
        }
        if sidecar.external_ids.len() != sidecar.item_count
            || sidecar.metadata.len() != sidecar.item_count
        {
            return Err(SimilarityError::corruption(
                path,
                format!(
                    "item count {} disagrees with {} ids and {} metadata entries",
                    sidecar.item_count,
                    sidecar.external_ids.len(),
                    sidecar.metadata.len()
                ),
            ));
        }
        Ok(sidecar)
    }
}
