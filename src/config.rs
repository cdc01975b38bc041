//! Engine configuration
//!
//! Defaults match CLIP ViT-B/32 image embeddings searched exhaustively under
//! cosine similarity. Every field can be overridden from the environment:
//!
//! - SIMILARITY_DIMENSION: embedding length (default: 512)
//! - SIMILARITY_METRIC: `cosine`, `euclidean`/`l2`, `inner_product`/`ip`
//! - SIMILARITY_BACKEND: `flat`/`exact`, `graph`/`vamana`
//! - SIMILARITY_MAX_DEGREE, SIMILARITY_SEARCH_LIST_SIZE, SIMILARITY_ALPHA
//! - SIMILARITY_DUPLICATE_FAN_OUT, SIMILARITY_VARIANT_FAN_OUT
//! - SIMILARITY_HISTOGRAM_BINS, SIMILARITY_HISTOGRAM_CUTOFF

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};
use crate::similarity::AnalyzerConfig;
use crate::vector_db::{Backend, IndexConfig, Metric, VamanaConfig};

pub const DEFAULT_DIMENSION: usize = 512;

const ENV_PREFIX: &str = "SIMILARITY_";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index: IndexConfig,
    pub analyzer: AnalyzerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::new(DEFAULT_DIMENSION, Metric::Cosine, Backend::Flat),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `SIMILARITY_*` variables that are set
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from `lookup`, keyed by the variable name without prefix
    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("DIMENSION") {
            self.index.dimension = parse("DIMENSION", &v)?;
        }
        if let Some(v) = lookup("METRIC") {
            self.index.metric = Metric::from_str(&v)?;
        }
        if let Some(v) = lookup("BACKEND") {
            self.index.backend = Backend::from_str(&v)?;
        }
        if let Some(v) = lookup("MAX_DEGREE") {
            self.index.vamana.max_degree = parse("MAX_DEGREE", &v)?;
        }
        if let Some(v) = lookup("SEARCH_LIST_SIZE") {
            self.index.vamana.search_list_size = parse("SEARCH_LIST_SIZE", &v)?;
        }
        if let Some(v) = lookup("ALPHA") {
            self.index.vamana.alpha = parse("ALPHA", &v)?;
        }
        if let Some(v) = lookup("DUPLICATE_FAN_OUT") {
            self.analyzer.duplicate_fan_out = parse("DUPLICATE_FAN_OUT", &v)?;
        }
        if let Some(v) = lookup("VARIANT_FAN_OUT") {
            self.analyzer.variant_fan_out = parse("VARIANT_FAN_OUT", &v)?;
        }
        if let Some(v) = lookup("HISTOGRAM_BINS") {
            self.analyzer.histogram_bins = parse("HISTOGRAM_BINS", &v)?;
        }
        if let Some(v) = lookup("HISTOGRAM_CUTOFF") {
            self.analyzer.histogram_cutoff = parse("HISTOGRAM_CUTOFF", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.index.dimension = dimension;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.index.metric = metric;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.index.backend = backend;
        self
    }

    pub fn with_vamana(mut self, vamana: VamanaConfig) -> Self {
        self.index.vamana = vamana;
        self
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_histogram_cutoff(mut self, cutoff: f32) -> Self {
        self.analyzer.histogram_cutoff = cutoff;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;

        let a = &self.analyzer;
        if a.duplicate_fan_out == 0 || a.variant_fan_out == 0 {
            return Err(SimilarityError::InvalidConfig(
                "analyzer fan-out must be at least 1".to_string(),
            ));
        }
        if a.histogram_bins == 0 || a.histogram_bins > 256 {
            return Err(SimilarityError::InvalidConfig(format!(
                "histogram_bins must be in 1..=256, got {}",
                a.histogram_bins
            )));
        }
        if !(0.0..=1.0).contains(&a.histogram_cutoff) {
            return Err(SimilarityError::InvalidConfig(format!(
                "histogram_cutoff must be in [0, 1], got {}",
                a.histogram_cutoff
            )));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        SimilarityError::InvalidConfig(format!("{ENV_PREFIX}{key}={value:?}: {e}"))
    })
}
