//! Duplicate, variant and cluster detection over a [`SimilarityIndex`]
//!
//! Every pass walks the collection in handle order and assigns each item to at
//! most one group, so results are deterministic for a fixed index state.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::histogram::{color_histogram, FileImageDecoder, ImageDecoder};
use super::index::SimilarityIndex;
use super::types::{DuplicateGroup, SimilarityResult};
use crate::error::{Result, SimilarityError};
use crate::vector_db::ItemHandle;

pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.99;

/// Upper bound of the variant band; anything above is a duplicate
const VARIANT_CEILING: f32 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Neighbors inspected per item when grouping duplicates
    pub duplicate_fan_out: usize,
    /// Neighbors inspected when looking for variants of one item
    pub variant_fan_out: usize,
    /// Buckets per channel for color histograms
    pub histogram_bins: usize,
    /// Minimum histogram distance for a variant to count as recolored
    pub histogram_cutoff: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            duplicate_fan_out: 10,
            variant_fan_out: 50,
            histogram_bins: 16,
            histogram_cutoff: 0.15,
        }
    }
}

pub struct DuplicateAnalyzer<'a> {
    index: &'a SimilarityIndex,
    config: AnalyzerConfig,
    decoder: Box<dyn ImageDecoder + 'a>,
}

impl<'a> DuplicateAnalyzer<'a> {
    pub fn new(index: &'a SimilarityIndex) -> Self {
        Self::with_config(index, AnalyzerConfig::default())
    }

    pub fn with_config(index: &'a SimilarityIndex, config: AnalyzerConfig) -> Self {
        Self {
            index,
            config,
            decoder: Box::new(FileImageDecoder),
        }
    }

    /// Replace the image source used by [`Self::detect_color_variants`]
    pub fn with_decoder(mut self, decoder: impl ImageDecoder + 'a) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Groups of near-identical items at or above `threshold`
    pub fn find_exact_duplicates(&self, threshold: f32) -> Result<Vec<DuplicateGroup>> {
        let groups = self.group_pass(threshold, self.config.duplicate_fan_out, None)?;
        info!(
            threshold,
            groups = groups.len(),
            items = groups.iter().map(Vec::len).sum::<usize>(),
            "Exact duplicate pass complete"
        );
        Ok(groups)
    }

    pub fn find_exact_duplicates_default(&self) -> Result<Vec<DuplicateGroup>> {
        self.find_exact_duplicates(DEFAULT_DUPLICATE_THRESHOLD)
    }

    /// Items whose similarity to `external_id` lies in `[min_similarity, max_similarity)`
    pub fn find_variants(
        &self,
        external_id: &str,
        min_similarity: f32,
        max_similarity: f32,
    ) -> Result<Vec<SimilarityResult>> {
        let handle = self.handle_of(external_id)?;
        let query = self.index.reconstruct(handle)?;
        let variants: Vec<SimilarityResult> = self
            .index
            .search(&query, self.config.variant_fan_out, None)?
            .into_iter()
            .filter(|r| r.handle != handle)
            .filter(|r| r.similarity >= min_similarity && r.similarity < max_similarity)
            .collect();

        debug!(
            external_id,
            min_similarity,
            max_similarity,
            found = variants.len(),
            "Variant search"
        );
        Ok(variants)
    }

    /// Clusters of at most `max_cluster_size` items, seed first
    pub fn cluster_similar(
        &self,
        similarity_threshold: f32,
        max_cluster_size: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        if max_cluster_size < 2 {
            return Ok(Vec::new());
        }
        let clusters = self.group_pass(
            similarity_threshold,
            max_cluster_size.saturating_add(1),
            Some(max_cluster_size),
        )?;
        info!(
            threshold = similarity_threshold,
            max_cluster_size,
            clusters = clusters.len(),
            "Clustering pass complete"
        );
        Ok(clusters)
    }

    /// Same as [`Self::cluster_similar`]
    pub fn group_by_similarity(
        &self,
        threshold: f32,
        max_group_size: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        self.cluster_similar(threshold, max_group_size)
    }

    /// Variants of `external_id` whose color histogram differs noticeably
    /// from the reference image
    pub fn detect_color_variants(
        &self,
        external_id: &str,
        threshold: f32,
    ) -> Result<Vec<SimilarityResult>> {
        let candidates = self.find_variants(external_id, threshold, VARIANT_CEILING)?;
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let bins = self.config.histogram_bins;
        let reference = color_histogram(&self.decoder.decode(Path::new(external_id))?, bins);

        let mut recolored = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let image = self.decoder.decode(Path::new(&candidate.external_id))?;
            let distance = reference.distance(&color_histogram(&image, bins));
            if distance > self.config.histogram_cutoff {
                recolored.push(candidate);
            }
        }

        info!(
            external_id,
            threshold,
            cutoff = self.config.histogram_cutoff,
            found = recolored.len(),
            "Color variant pass complete"
        );
        Ok(recolored)
    }

    fn handle_of(&self, external_id: &str) -> Result<ItemHandle> {
        self.index
            .find_by_external_id(external_id)
            .ok_or_else(|| SimilarityError::UnknownExternalId(external_id.to_string()))
    }

    /// Assign-once grouping shared by duplicate and cluster passes.
    ///
    /// A seed that finds no match is left unassigned and can still join a
    /// later group.
    fn group_pass(
        &self,
        threshold: f32,
        fan_out: usize,
        max_size: Option<usize>,
    ) -> Result<Vec<DuplicateGroup>> {
        let mut processed: HashSet<ItemHandle> = HashSet::new();
        let mut groups = Vec::new();

        for i in 0..self.index.len() {
            let seed = ItemHandle(i as u32);
            if processed.contains(&seed) {
                continue;
            }

            let query = self.index.reconstruct(seed)?;
            let mut members: Vec<SimilarityResult> = Vec::new();
            for result in self.index.search(&query, fan_out, None)? {
                if max_size.is_some_and(|max| members.len() + 1 >= max) {
                    break;
                }
                if result.handle == seed
                    || processed.contains(&result.handle)
                    || result.similarity < threshold
                {
                    continue;
                }
                members.push(result);
            }

            if members.is_empty() {
                continue;
            }

            processed.insert(seed);
            processed.extend(members.iter().map(|m| m.handle));

            let mut group = Vec::with_capacity(members.len() + 1);
            group.push(self.index.self_result(seed)?);
            group.extend(members);
            groups.push(group);
        }

        Ok(groups)
    }
}
