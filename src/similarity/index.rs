//! Similarity index: vector backend plus item bookkeeping
//!
//! Wraps a [`VectorIndex`] with the external identifier and metadata of every
//! handle. All state sits behind one `parking_lot::RwLock`: adds, `load` and
//! `set_metadata` take the write lock, while searches, `save` and statistics
//! share the read lock.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::sidecar::{payload_path, sidecar_path, Sidecar, SIDECAR_VERSION};
use super::store::MetadataStore;
use super::types::{IndexStatistics, ItemRecord, Metadata, SimilarityResult};
use crate::error::{Result, SimilarityError};
use crate::vector_db::{
    self, persist, Backend, IndexConfig, ItemHandle, Metric, Neighbor, VectorIndex,
};

#[derive(Debug)]
struct IndexState {
    config: IndexConfig,
    vectors: Box<dyn VectorIndex>,
    external_ids: Vec<String>,
    metadata: Vec<Metadata>,
    /// First handle registered for each external id
    by_external_id: HashMap<String, ItemHandle>,
}

impl IndexState {
    fn empty(config: IndexConfig) -> Result<Self> {
        Ok(Self {
            vectors: vector_db::try_create(&config)?,
            config,
            external_ids: Vec::new(),
            metadata: Vec::new(),
            by_external_id: HashMap::new(),
        })
    }

    fn register(&mut self, handle: ItemHandle, external_id: String, metadata: Metadata) {
        debug_assert_eq!(handle.index(), self.external_ids.len());
        self.by_external_id
            .entry(external_id.clone())
            .or_insert(handle);
        self.external_ids.push(external_id);
        self.metadata.push(metadata);
    }

    fn to_result(&self, neighbor: Neighbor) -> SimilarityResult {
        let i = neighbor.handle.index();
        SimilarityResult {
            handle: neighbor.handle,
            external_id: self.external_ids[i].clone(),
            raw_score: neighbor.score,
            similarity: self.config.metric.similarity(neighbor.score),
            metadata: self.metadata[i].clone(),
        }
    }

    fn check_handle(&self, handle: ItemHandle) -> Result<()> {
        if handle.index() >= self.external_ids.len() {
            return Err(SimilarityError::UnknownHandle(handle));
        }
        Ok(())
    }

    /// Read both artifacts and cross-check them before building state
    fn read(base: &Path) -> Result<Self> {
        let sidecar_file = sidecar_path(base);
        let payload_file = payload_path(base);

        let sidecar = Sidecar::read(&sidecar_file)?;
        let payload = persist::read_payload_file(&payload_file)?;
        let vamana = payload.vamana;
        let vectors = vector_db::from_payload(payload)?;

        if vectors.len() != sidecar.item_count {
            return Err(SimilarityError::corruption(
                &payload_file,
                format!(
                    "payload holds {} vectors but sidecar lists {} items",
                    vectors.len(),
                    sidecar.item_count
                ),
            ));
        }
        if vectors.dimension() != sidecar.dimensionality
            || vectors.metric() != sidecar.metric
            || vectors.backend() != sidecar.backend
        {
            return Err(SimilarityError::corruption(
                &payload_file,
                format!(
                    "payload is {}d/{}/{} but sidecar says {}d/{}/{}",
                    vectors.dimension(),
                    vectors.metric(),
                    vectors.backend(),
                    sidecar.dimensionality,
                    sidecar.metric,
                    sidecar.backend
                ),
            ));
        }

        let mut by_external_id = HashMap::with_capacity(sidecar.external_ids.len());
        for (i, id) in sidecar.external_ids.iter().enumerate() {
            by_external_id
                .entry(id.clone())
                .or_insert(ItemHandle(i as u32));
        }

        Ok(Self {
            config: IndexConfig::new(sidecar.dimensionality, sidecar.metric, sidecar.backend)
                .with_vamana(vamana),
            vectors,
            external_ids: sidecar.external_ids,
            metadata: sidecar.metadata,
            by_external_id,
        })
    }
}

/// Thread-safe similarity index over image embeddings
#[derive(Debug)]
pub struct SimilarityIndex {
    state: RwLock<IndexState>,
}

impl SimilarityIndex {
    /// Empty index with default graph parameters
    pub fn create(dimension: usize, metric: Metric, backend: Backend) -> Result<Self> {
        Self::with_config(IndexConfig::new(dimension, metric, backend))
    }

    pub fn with_config(config: IndexConfig) -> Result<Self> {
        let state = IndexState::empty(config)?;
        info!(
            dim = config.dimension,
            metric = %config.metric,
            backend = %config.backend,
            "SimilarityIndex initialized"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Load a previously saved index from `<base>.index` + `<base>.meta`
    pub fn open(base: &Path) -> Result<Self> {
        let state = IndexState::read(base)?;
        info!(
            path = %base.display(),
            count = state.external_ids.len(),
            "Loaded similarity index"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Re-hydrate an index from durable records, in store key order
    pub fn rebuild_from_store(
        store: &MetadataStore,
        model_name: Option<&str>,
        config: IndexConfig,
    ) -> Result<Self> {
        let records = store.get_all(model_name)?;
        let index = Self::with_config(config)?;

        let mut vectors = Vec::with_capacity(records.len());
        let mut ids = Vec::with_capacity(records.len());
        let mut metadata = Vec::with_capacity(records.len());
        for record in records {
            vectors.push(record.embedding);
            ids.push(record.external_id);
            metadata.push(record.metadata.unwrap_or_default());
        }
        index.add_embeddings_batch(&vectors, ids, Some(metadata))?;

        info!(
            count = index.len(),
            model = model_name.unwrap_or("*"),
            "Rebuilt similarity index from metadata store"
        );
        Ok(index)
    }

    pub fn add_embedding(
        &self,
        vector: &[f32],
        external_id: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<ItemHandle> {
        let external_id = external_id.into();
        let mut state = self.state.write();
        let handle = state.vectors.add(vector)?;
        debug!(handle = %handle, external_id = %external_id, "Added embedding");
        state.register(handle, external_id, metadata.unwrap_or_default());
        Ok(handle)
    }

    /// All-or-nothing batch add; handles follow input order
    pub fn add_embeddings_batch(
        &self,
        vectors: &[Vec<f32>],
        external_ids: Vec<String>,
        metadata_list: Option<Vec<Metadata>>,
    ) -> Result<Vec<ItemHandle>> {
        if vectors.len() != external_ids.len() {
            return Err(SimilarityError::LengthMismatch {
                what: "external_ids",
                expected: vectors.len(),
                actual: external_ids.len(),
            });
        }
        let metadata_list = match metadata_list {
            Some(list) if list.len() != vectors.len() => {
                return Err(SimilarityError::LengthMismatch {
                    what: "metadata_list",
                    expected: vectors.len(),
                    actual: list.len(),
                });
            }
            Some(list) => list,
            None => vec![Metadata::new(); vectors.len()],
        };

        let mut state = self.state.write();
        let handles = state.vectors.add_batch(vectors)?;
        for ((handle, id), meta) in handles.iter().zip(external_ids).zip(metadata_list) {
            state.register(*handle, id, meta);
        }

        info!(count = handles.len(), total = state.external_ids.len(), "Added embeddings to index");
        Ok(handles)
    }

    /// Top `k` matches, then drop those under `min_similarity`
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SimilarityResult>> {
        let state = self.state.read();
        let neighbors = state.vectors.search(query, k)?;
        Ok(neighbors
            .into_iter()
            .map(|n| state.to_result(n))
            .filter(|r| min_similarity.map_or(true, |floor| r.similarity >= floor))
            .collect())
    }

    /// Search with an embedding from a text encoder sharing the image space
    pub fn search_by_text(
        &self,
        text_embedding: &[f32],
        k: usize,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SimilarityResult>> {
        self.search(text_embedding, k, min_similarity)
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<ItemHandle> {
        self.state.read().by_external_id.get(external_id).copied()
    }

    pub fn record(&self, handle: ItemHandle) -> Result<ItemRecord> {
        let state = self.state.read();
        state.check_handle(handle)?;
        Ok(ItemRecord {
            handle,
            external_id: state.external_ids[handle.index()].clone(),
            metadata: state.metadata[handle.index()].clone(),
        })
    }

    pub fn reconstruct(&self, handle: ItemHandle) -> Result<Vec<f32>> {
        self.state.read().vectors.reconstruct(handle)
    }

    /// Replace an item's metadata wholesale
    pub fn set_metadata(&self, handle: ItemHandle, metadata: Metadata) -> Result<()> {
        let mut state = self.state.write();
        state.check_handle(handle)?;
        state.metadata[handle.index()] = metadata;
        Ok(())
    }

    /// Result for `handle` scored against its own stored vector
    pub fn self_result(&self, handle: ItemHandle) -> Result<SimilarityResult> {
        let state = self.state.read();
        state.check_handle(handle)?;
        let vector = state.vectors.reconstruct(handle)?;
        let score = state.config.metric.score(&vector, &vector);
        Ok(state.to_result(Neighbor { handle, score }))
    }

    pub fn len(&self) -> usize {
        self.state.read().external_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metric(&self) -> Metric {
        self.state.read().config.metric
    }

    pub fn config(&self) -> IndexConfig {
        self.state.read().config
    }

    pub fn statistics(&self) -> IndexStatistics {
        let state = self.state.read();
        IndexStatistics {
            count: state.external_ids.len(),
            dimensionality: state.config.dimension,
            metric: state.config.metric,
            backend: state.config.backend,
        }
    }

    /// Write `<base>.index` and `<base>.meta`
    pub fn save(&self, base: &Path) -> Result<()> {
        let start = std::time::Instant::now();
        let state = self.state.read();

        if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        persist::write_payload_file(&payload_path(base), &state.vectors.serialize())?;
        Sidecar {
            format_version: SIDECAR_VERSION,
            item_count: state.external_ids.len(),
            dimensionality: state.config.dimension,
            metric: state.config.metric,
            backend: state.config.backend,
            external_ids: state.external_ids.clone(),
            metadata: state.metadata.clone(),
        }
        .write(&sidecar_path(base))?;

        info!(
            path = %base.display(),
            count = state.external_ids.len(),
            elapsed = ?start.elapsed(),
            "Saved similarity index"
        );
        Ok(())
    }

    /// Replace the current contents with a saved index. On error the
    /// current contents are left as they were.
    pub fn load(&self, base: &Path) -> Result<()> {
        let loaded = IndexState::read(base)?;
        let count = loaded.external_ids.len();
        *self.state.write() = loaded;
        info!(path = %base.display(), count, "Loaded similarity index");
        Ok(())
    }

    /// Check the payload checksum without loading
    pub fn verify(base: &Path) -> Result<bool> {
        persist::verify_payload_file(&payload_path(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_index() -> SimilarityIndex {
        let index = SimilarityIndex::create(4, Metric::Cosine, Backend::Flat).unwrap();
        index.add_embedding(&[1.0, 0.0, 0.0, 0.0], "a.png", None).unwrap();
        index.add_embedding(&[1.0, 0.0, 0.0, 0.001], "a2.png", None).unwrap();
        index.add_embedding(&[0.0, 1.0, 0.0, 0.0], "b.png", None).unwrap();
        index
    }

    fn meta(key: &str, value: serde_json::Value) -> Metadata {
        let mut m = Metadata::new();
        m.insert(key.to_string(), value);
        m
    }

    #[test]
    fn test_end_to_end_search() {
        let index = sample_index();
        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 3, None).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a.png", "a2.png", "b.png"]);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert!((results[1].similarity - 0.9999995).abs() < 1e-6);
        assert!(results[2].similarity.abs() < 1e-6);
    }

    #[test]
    fn test_min_similarity_applied_after_ranking() {
        let index = sample_index();
        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 3, Some(0.5)).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.similarity >= 0.5));
    }

    #[test]
    fn test_dimension_mismatch_leaves_size_unchanged() {
        let index = sample_index();
        let err = index.add_embedding(&[1.0, 0.0], "bad.png", None).unwrap_err();
        assert!(matches!(err, SimilarityError::DimensionMismatch { expected: 4, actual: 2 }));
        assert_eq!(index.len(), 3);
        assert!(index.find_by_external_id("bad.png").is_none());
        assert!(index.search(&[1.0, 0.0, 0.0], 1, None).is_err());
    }

    #[test]
    fn test_batch_equivalent_to_sequential() {
        let vectors = vec![
            vec![0.2, 0.4, 0.1, 0.0],
            vec![0.9, 0.1, 0.3, 0.2],
            vec![0.0, 0.0, 0.0, 0.0],
        ];
        let ids = vec!["x.png".to_string(), "y.png".to_string(), "z.png".to_string()];
        let metas = vec![meta("n", json!(1)), meta("n", json!(2)), meta("n", json!(3))];

        let batched = SimilarityIndex::create(4, Metric::Cosine, Backend::Flat).unwrap();
        let handles = batched
            .add_embeddings_batch(&vectors, ids.clone(), Some(metas.clone()))
            .unwrap();

        let sequential = SimilarityIndex::create(4, Metric::Cosine, Backend::Flat).unwrap();
        for ((v, id), m) in vectors.iter().zip(&ids).zip(&metas) {
            sequential.add_embedding(v, id.clone(), Some(m.clone())).unwrap();
        }

        assert_eq!(handles, vec![ItemHandle(0), ItemHandle(1), ItemHandle(2)]);
        for h in handles {
            assert_eq!(batched.record(h).unwrap(), sequential.record(h).unwrap());
            assert_eq!(batched.reconstruct(h).unwrap(), sequential.reconstruct(h).unwrap());
        }
        // zero vector is stored unchanged
        assert_eq!(batched.reconstruct(ItemHandle(2)).unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn test_batch_length_mismatch() {
        let index = SimilarityIndex::create(2, Metric::Cosine, Backend::Flat).unwrap();
        let err = index
            .add_embeddings_batch(&[vec![1.0, 0.0]], vec![], None)
            .unwrap_err();
        assert!(matches!(err, SimilarityError::LengthMismatch { .. }));

        let err = index
            .add_embeddings_batch(
                &[vec![1.0, 0.0]],
                vec!["a".to_string()],
                Some(vec![Metadata::new(), Metadata::new()]),
            )
            .unwrap_err();
        assert!(matches!(err, SimilarityError::LengthMismatch { what: "metadata_list", .. }));
        assert!(index.is_empty());
    }

    #[test]
    fn test_find_by_external_id_and_metadata_replacement() {
        let index = sample_index();
        let handle = index.find_by_external_id("a2.png").unwrap();
        assert_eq!(handle, ItemHandle(1));
        assert!(index.find_by_external_id("nope.png").is_none());

        index.set_metadata(handle, meta("palette", json!("red"))).unwrap();
        assert_eq!(index.record(handle).unwrap().metadata["palette"], json!("red"));
        assert!(matches!(
            index.set_metadata(ItemHandle(10), Metadata::new()),
            Err(SimilarityError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_self_similarity_is_one() {
        let index = sample_index();
        for i in 0..3 {
            let handle = ItemHandle(i);
            let vector = index.reconstruct(handle).unwrap();
            let top = &index.search(&vector, 1, None).unwrap()[0];
            assert!((top.raw_score - 1.0).abs() < 1e-6);
            assert!((-1.0..=1.0 + 1e-6).contains(&top.raw_score));
            assert!((index.self_result(handle).unwrap().similarity - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("library");
        let index = sample_index();
        index.set_metadata(ItemHandle(0), meta("size", json!([64, 64]))).unwrap();
        index.save(&base).unwrap();
        assert!(SimilarityIndex::verify(&base).unwrap());

        let restored = SimilarityIndex::open(&base).unwrap();
        assert_eq!(restored.statistics(), index.statistics());
        assert_eq!(restored.record(ItemHandle(0)).unwrap(), index.record(ItemHandle(0)).unwrap());

        for q in [[1.0, 0.0, 0.0, 0.0], [0.3, 0.7, 0.1, -0.2]] {
            let before = index.search(&q, 3, None).unwrap();
            let after = restored.search(&q, 3, None).unwrap();
            assert_eq!(before.len(), after.len());
            for (b, a) in before.iter().zip(&after) {
                assert_eq!(b.external_id, a.external_id);
                assert!((b.raw_score - a.raw_score).abs() < 1e-6);
            }
        }
    }

    #[cfg(feature = "graph-index")]
    #[test]
    fn test_save_load_graph_backend() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("graph");
        let index = SimilarityIndex::create(3, Metric::Euclidean, Backend::Graph).unwrap();
        for i in 0..20 {
            index
                .add_embedding(&[i as f32, (i % 3) as f32, 1.0], format!("t{i}.png"), None)
                .unwrap();
        }
        index.save(&base).unwrap();
        let restored = SimilarityIndex::open(&base).unwrap();
        assert_eq!(restored.statistics().backend, Backend::Graph);
        assert_eq!(
            restored.search(&[4.0, 1.0, 1.0], 5, None).unwrap(),
            index.search(&[4.0, 1.0, 1.0], 5, None).unwrap()
        );
    }

    #[cfg(feature = "graph-index")]
    #[test]
    fn test_open_keeps_saved_graph_parameters() {
        use crate::vector_db::VamanaConfig;

        let dir = tempdir().unwrap();
        let base = dir.path().join("tuned");
        let vamana = VamanaConfig {
            max_degree: 8,
            search_list_size: 20,
            alpha: 1.1,
        };
        let config = IndexConfig::new(3, Metric::Cosine, Backend::Graph).with_vamana(vamana);
        let index = SimilarityIndex::with_config(config).unwrap();
        for i in 0..30 {
            index
                .add_embedding(&[1.0, i as f32, (i % 4) as f32], format!("t{i}.png"), None)
                .unwrap();
        }
        index.save(&base).unwrap();

        let restored = SimilarityIndex::open(&base).unwrap();
        assert_eq!(restored.config(), config);
        assert_eq!(restored.config().vamana, vamana);

        let reloaded = SimilarityIndex::create(3, Metric::Cosine, Backend::Graph).unwrap();
        reloaded.load(&base).unwrap();
        assert_eq!(reloaded.config().vamana, vamana);
    }

    #[test]
    fn test_load_missing_sidecar_is_corruption_and_keeps_state() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("library");
        sample_index().save(&base).unwrap();
        std::fs::remove_file(sidecar_path(&base)).unwrap();

        let index = SimilarityIndex::create(4, Metric::Cosine, Backend::Flat).unwrap();
        index.add_embedding(&[0.0, 0.0, 1.0, 0.0], "keep.png", None).unwrap();
        let err = index.load(&base).unwrap_err();
        assert!(matches!(err, SimilarityError::StorageCorruption { .. }));
        assert_eq!(index.len(), 1);
        assert!(index.find_by_external_id("keep.png").is_some());
    }

    #[test]
    fn test_load_count_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let small = dir.path().join("small");
        let large = dir.path().join("large");
        sample_index().save(&large).unwrap();

        let two = SimilarityIndex::create(4, Metric::Cosine, Backend::Flat).unwrap();
        two.add_embedding(&[1.0, 0.0, 0.0, 0.0], "a.png", None).unwrap();
        two.add_embedding(&[0.0, 1.0, 0.0, 0.0], "b.png", None).unwrap();
        two.save(&small).unwrap();

        // pair the three-item payload with the two-item sidecar
        std::fs::copy(payload_path(&large), payload_path(&small)).unwrap();
        let err = SimilarityIndex::open(&small).unwrap_err();
        assert!(matches!(err, SimilarityError::StorageCorruption { .. }));
    }

    #[test]
    fn test_load_replaces_contents() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("library");
        sample_index().save(&base).unwrap();

        let index = SimilarityIndex::create(4, Metric::Cosine, Backend::Flat).unwrap();
        index.load(&base).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.find_by_external_id("b.png"), Some(ItemHandle(2)));
    }

    #[test]
    fn test_rebuild_from_store() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("db")).unwrap();
        store.put("a.png", &[1.0, 0.0], "clip", Some(meta("k", json!(1)))).unwrap();
        store.put("b.png", &[0.0, 1.0], "clip", None).unwrap();
        store.put("c.png", &[1.0, 1.0, 1.0], "other", None).unwrap();

        let config = IndexConfig::new(2, Metric::Cosine, Backend::Flat);
        let index = SimilarityIndex::rebuild_from_store(&store, Some("clip"), config).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.find_by_external_id("a.png"), Some(ItemHandle(0)));
        assert_eq!(index.record(ItemHandle(0)).unwrap().metadata["k"], json!(1));

        // mixed dimensionalities are rejected as a whole
        let err = SimilarityIndex::rebuild_from_store(&store, None, config).unwrap_err();
        assert!(matches!(err, SimilarityError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_concurrent_searches() {
        let index = std::sync::Arc::new(sample_index());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || index.search(&[1.0, 0.0, 0.0, 0.0], 2, None).unwrap())
            })
            .collect();
        for h in handles {
            let results = h.join().unwrap();
            assert_eq!(results[0].external_id, "a.png");
        }
    }
}
