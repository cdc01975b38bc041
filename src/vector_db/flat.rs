//! Exact brute-force index
//!
//! Every query scans all stored vectors (O(n·D)). Slow for large
//! collections, but its rankings are the reference the graph backend is
//! measured against.

use super::persist::{self, PayloadHeader};
use super::storage::VectorStore;
use super::{rank_top_k, Backend, ItemHandle, Metric, Neighbor, VectorIndex};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FlatIndex {
    store: VectorStore,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            store: VectorStore::new(dimension, metric),
        }
    }

    pub(crate) fn from_store(store: VectorStore) -> Self {
        Self { store }
    }
}

/// Score `query` (already prepared) against every row and keep the best `k`
pub(crate) fn exhaustive_scan(store: &VectorStore, query: &[f32], k: usize) -> Vec<Neighbor> {
    if k == 0 || store.is_empty() {
        return Vec::new();
    }
    let metric = store.metric();
    let hits: Vec<Neighbor> = store
        .rows()
        .enumerate()
        .map(|(i, row)| Neighbor {
            handle: ItemHandle(i as u32),
            score: metric.score(query, row),
        })
        .collect();
    rank_top_k(metric, hits, k)
}

impl VectorIndex for FlatIndex {
    fn backend(&self) -> Backend {
        Backend::Flat
    }

    fn metric(&self) -> Metric {
        self.store.metric()
    }

    fn dimension(&self) -> usize {
        self.store.dimension()
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn add(&mut self, vector: &[f32]) -> Result<ItemHandle> {
        self.store.push(vector)
    }

    fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ItemHandle>> {
        self.store.push_batch(vectors)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.store.check(query)?;
        let query = self.store.prepare(query);
        Ok(exhaustive_scan(&self.store, &query, k))
    }

    fn reconstruct(&self, handle: ItemHandle) -> Result<Vec<f32>> {
        Ok(self.store.get(handle)?.to_vec())
    }

    fn serialize(&self) -> Vec<u8> {
        let header = PayloadHeader::flat(&self.store);
        persist::encode(&header, None, self.store.raw())
    }
}
