//! Contiguous vector storage shared by all backends
//!
//! Vectors live in one flat `Vec<f32>` (row-major, `dimension` floats per
//! row). Dimension checks and cosine normalization happen here so every
//! backend enforces them the same way.

use rayon::prelude::*;

use super::distance_inline::normalize_in_place;
use super::{ItemHandle, Metric};
use crate::error::{Result, SimilarityError};

/// Batches at or above this size are normalized on the rayon pool
const PARALLEL_PREPARE_THRESHOLD: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl VectorStore {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
        }
    }

    /// Wrap already-prepared rows. `data.len()` must be a multiple of `dimension`.
    pub(crate) fn from_raw(dimension: usize, metric: Metric, data: Vec<f32>) -> Self {
        debug_assert!(dimension > 0 && data.len() % dimension == 0);
        Self {
            dimension,
            metric,
            data,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(SimilarityError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Copy of `vector` ready for scoring (unit length under cosine)
    pub fn prepare(&self, vector: &[f32]) -> Vec<f32> {
        let mut prepared = vector.to_vec();
        if self.metric.normalizes() {
            normalize_in_place(&mut prepared);
        }
        prepared
    }

    pub fn push(&mut self, vector: &[f32]) -> Result<ItemHandle> {
        self.check(vector)?;
        let handle = ItemHandle(self.len() as u32);
        let start = self.data.len();
        self.data.extend_from_slice(vector);
        if self.metric.normalizes() {
            normalize_in_place(&mut self.data[start..]);
        }
        Ok(handle)
    }

    /// Validate the whole batch, then append rows in input order
    pub fn push_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ItemHandle>> {
        for v in vectors {
            self.check(v)?;
        }

        let first = self.len() as u32;
        let prepared: Vec<Vec<f32>> = if vectors.len() >= PARALLEL_PREPARE_THRESHOLD {
            vectors.par_iter().map(|v| self.prepare(v)).collect()
        } else {
            vectors.iter().map(|v| self.prepare(v)).collect()
        };

        self.data.reserve(prepared.len() * self.dimension);
        for row in &prepared {
            self.data.extend_from_slice(row);
        }

        Ok((0..vectors.len() as u32)
            .map(|offset| ItemHandle(first + offset))
            .collect())
    }

    /// Row for a handle the caller has already bounds-checked
    #[inline]
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.dimension;
        &self.data[start..start + self.dimension]
    }

    pub fn get(&self, handle: ItemHandle) -> Result<&[f32]> {
        if handle.index() >= self.len() {
            return Err(SimilarityError::UnknownHandle(handle));
        }
        Ok(self.row(handle.index()))
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }

    pub fn raw(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_normalizes_under_cosine() {
        let mut store = VectorStore::new(2, Metric::Cosine);
        let h = store.push(&[3.0, 4.0]).unwrap();
        assert_eq!(h, ItemHandle(0));
        let row = store.get(h).unwrap();
        assert!((row[0] - 0.6).abs() < 1e-6);
        assert!((row[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_push_keeps_raw_under_euclidean() {
        let mut store = VectorStore::new(2, Metric::Euclidean);
        store.push(&[3.0, 4.0]).unwrap();
        assert_eq!(store.row(0), &[3.0, 4.0]);
    }

    #[test]
    fn test_rejected_batch_leaves_store_unchanged() {
        let mut store = VectorStore::new(3, Metric::Cosine);
        store.push(&[1.0, 0.0, 0.0]).unwrap();
        let err = store
            .push_batch(&[vec![1.0, 1.0, 1.0], vec![1.0, 2.0]])
            .unwrap_err();
        assert!(matches!(
            err,
            SimilarityError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_parallel_batch_preserves_order() {
        let vectors: Vec<Vec<f32>> = (0..200).map(|i| vec![i as f32, 1.0]).collect();

        let mut batched = VectorStore::new(2, Metric::Cosine);
        let handles = batched.push_batch(&vectors).unwrap();

        let mut sequential = VectorStore::new(2, Metric::Cosine);
        for v in &vectors {
            sequential.push(v).unwrap();
        }

        assert_eq!(handles.len(), 200);
        assert_eq!(handles[199], ItemHandle(199));
        assert_eq!(batched, sequential);
    }

    #[test]
    fn test_unknown_handle() {
        let store = VectorStore::new(2, Metric::Cosine);
        assert!(matches!(
            store.get(ItemHandle(0)),
            Err(SimilarityError::UnknownHandle(ItemHandle(0)))
        ));
    }
}
