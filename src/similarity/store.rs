//! Durable embedding store backed by RocksDB
//!
//! One record per external id, holding the raw embedding, its source model
//! and optional metadata. Independent of any in-memory index so a
//! [`SimilarityIndex`](super::SimilarityIndex) can be re-hydrated from it.
//!
//! Storage schema:
//! - `embedding:{external_id}` - JSON-encoded [`StoredEmbedding`]

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rocksdb::{FlushOptions, IteratorMode, Options, WriteOptions, DB};
use serde::{Deserialize, Serialize};

use super::types::Metadata;
use crate::error::{Result, SimilarityError};

const KEY_PREFIX: &str = "embedding:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub external_id: String,
    pub embedding: Vec<f32>,
    pub dimensionality: usize,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Exclusively owned handle to the embedding database
pub struct MetadataStore {
    db: Option<DB>,
    path: PathBuf,
}

impl MetadataStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        tracing::info!(path = %path.display(), "Metadata store opened");
        Ok(Self {
            db: Some(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self) -> Result<&DB> {
        self.db.as_ref().ok_or(SimilarityError::StoreClosed)
    }

    fn key(external_id: &str) -> String {
        format!("{KEY_PREFIX}{external_id}")
    }

    /// Insert or replace the record for `external_id`; synced before returning.
    ///
    /// NaN and infinite components are rejected: JSON has no encoding for them.
    pub fn put(
        &self,
        external_id: &str,
        embedding: &[f32],
        model_name: &str,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        let db = self.db()?;
        if let Some(position) = embedding.iter().position(|v| !v.is_finite()) {
            return Err(SimilarityError::NonFiniteEmbedding {
                external_id: external_id.to_string(),
                position,
            });
        }
        let record = StoredEmbedding {
            external_id: external_id.to_string(),
            embedding: embedding.to_vec(),
            dimensionality: embedding.len(),
            model_name: model_name.to_string(),
            created_at: Utc::now(),
            metadata,
        };
        let value = serde_json::to_vec(&record)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        db.put_opt(Self::key(external_id).as_bytes(), &value, &write_opts)?;

        tracing::debug!(
            external_id = %external_id,
            model = %model_name,
            dim = embedding.len(),
            "Stored embedding"
        );
        Ok(())
    }

    pub fn get(&self, external_id: &str) -> Result<Option<StoredEmbedding>> {
        let db = self.db()?;
        match db.get(Self::key(external_id).as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// All records in key order, optionally restricted to one model
    pub fn get_all(&self, model_name: Option<&str>) -> Result<Vec<StoredEmbedding>> {
        let db = self.db()?;
        let mut records = Vec::new();

        let iter = db.iterator(IteratorMode::From(
            KEY_PREFIX.as_bytes(),
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(KEY_PREFIX.as_bytes()) {
                break;
            }
            let record: StoredEmbedding = serde_json::from_slice(&value)?;
            if model_name.map_or(true, |m| record.model_name == m) {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn len(&self) -> Result<usize> {
        let db = self.db()?;
        let mut count = 0;
        let iter = db.iterator(IteratorMode::From(
            KEY_PREFIX.as_bytes(),
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(KEY_PREFIX.as_bytes()) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        let mut flush_opts = FlushOptions::default();
        flush_opts.set_wait(true);
        self.db()?.flush_opt(&flush_opts)?;
        Ok(())
    }

    /// Release the database. Later calls fail with `StoreClosed`.
    pub fn close(&mut self) -> Result<()> {
        if let Some(db) = self.db.as_ref() {
            let mut flush_opts = FlushOptions::default();
            flush_opts.set_wait(true);
            db.flush_opt(&flush_opts)?;
        }
        if self.db.take().is_some() {
            tracing::info!(path = %self.path.display(), "Metadata store closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (MetadataStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _dir) = create_test_store();
        let mut meta = Metadata::new();
        meta.insert("category".to_string(), serde_json::json!("ui"));

        store
            .put("tex/a.png", &[0.1, 0.2, 0.3], "clip-vit-b32", Some(meta.clone()))
            .unwrap();

        let record = store.get("tex/a.png").unwrap().unwrap();
        assert_eq!(record.embedding, vec![0.1, 0.2, 0.3]);
        assert_eq!(record.dimensionality, 3);
        assert_eq!(record.model_name, "clip-vit-b32");
        assert_eq!(record.metadata, Some(meta));
        assert!(store.get("tex/missing.png").unwrap().is_none());
    }

    #[test]
    fn test_put_is_upsert() {
        let (store, _dir) = create_test_store();
        store.put("a.png", &[1.0, 0.0], "clip", None).unwrap();
        store.put("a.png", &[0.0, 1.0, 0.5], "dino", None).unwrap();

        let record = store.get("a.png").unwrap().unwrap();
        assert_eq!(record.embedding, vec![0.0, 1.0, 0.5]);
        assert_eq!(record.model_name, "dino");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_non_finite_embedding_rejected_before_write() {
        let (store, _dir) = create_test_store();
        store.put("a.png", &[0.5, 0.5], "clip", None).unwrap();

        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let err = store.put("b.png", &[1.0, bad], "clip", None).unwrap_err();
            assert!(matches!(
                err,
                SimilarityError::NonFiniteEmbedding { position: 1, .. }
            ));
        }
        // upsert of an existing id is rejected too and keeps the old record
        assert!(store.put("a.png", &[f32::NAN, 0.0], "clip", None).is_err());

        assert!(store.get("b.png").unwrap().is_none());
        assert_eq!(store.get("a.png").unwrap().unwrap().embedding, vec![0.5, 0.5]);
        assert_eq!(store.get_all(None).unwrap().len(), 1);
    }

    #[test]
    fn test_get_all_filters_by_model() {
        let (store, _dir) = create_test_store();
        store.put("a.png", &[1.0], "clip", None).unwrap();
        store.put("b.png", &[2.0], "dino", None).unwrap();
        store.put("c.png", &[3.0], "clip", None).unwrap();

        let all = store.get_all(None).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a.png", "b.png", "c.png"]);

        let clip = store.get_all(Some("clip")).unwrap();
        assert_eq!(clip.len(), 2);
        assert!(clip.iter().all(|r| r.model_name == "clip"));
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut store = MetadataStore::open(temp_dir.path()).unwrap();
            store.put("a.png", &[0.5, 0.5], "clip", None).unwrap();
            store.close().unwrap();
        }
        let store = MetadataStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get("a.png").unwrap().unwrap().embedding, vec![0.5, 0.5]);
    }

    #[test]
    fn test_calls_after_close_fail() {
        let (mut store, _dir) = create_test_store();
        store.put("a.png", &[1.0], "clip", None).unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        assert!(matches!(store.get("a.png"), Err(SimilarityError::StoreClosed)));
        assert!(matches!(
            store.put("b.png", &[1.0], "clip", None),
            Err(SimilarityError::StoreClosed)
        ));
        assert!(matches!(store.get_all(None), Err(SimilarityError::StoreClosed)));
        // closing twice is harmless
        store.close().unwrap();
    }
}
