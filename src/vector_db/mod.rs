//! Vector index backends for embedding similarity search
//!
//! Every backend implements [`VectorIndex`]. The exact brute-force
//! [`FlatIndex`] is always available and is the correctness oracle. The
//! approximate Vamana graph backend is compiled in with the `graph-index`
//! feature; requesting it without the feature fails with
//! [`SimilarityError::BackendUnavailable`].

pub mod distance_inline;
pub mod flat;
pub mod persist;
pub mod storage;
#[cfg(feature = "graph-index")]
pub mod vamana;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};

pub use flat::FlatIndex;
#[cfg(feature = "graph-index")]
pub use vamana::VamanaIndex;

/// Dense, zero-based position of a vector inside one index instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemHandle(pub u32);

impl ItemHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Closeness measure used to rank search results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Inner product of unit vectors. Vectors are normalized on the way in.
    Cosine,
    /// Squared L2 distance (lower is closer)
    Euclidean,
    /// Raw inner product, no normalization
    InnerProduct,
}

impl Metric {
    pub fn normalizes(self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Raw score between two prepared vectors
    #[inline]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine | Metric::InnerProduct => distance_inline::dot(a, b),
            Metric::Euclidean => distance_inline::l2_squared(a, b),
        }
    }

    /// Sort key where lower ranks first.
    ///
    /// Adding `0.0` folds `-0.0` into `+0.0` so `total_cmp` treats them as equal.
    #[inline]
    pub fn rank_key(self, raw: f32) -> f32 {
        match self {
            Metric::Cosine | Metric::InnerProduct => -raw + 0.0,
            Metric::Euclidean => raw + 0.0,
        }
    }

    /// Map a raw score onto the user-facing similarity scale
    pub fn similarity(self, raw: f32) -> f32 {
        match self {
            Metric::Cosine => raw.clamp(0.0, 1.0),
            Metric::InnerProduct => raw,
            Metric::Euclidean => 1.0 / (1.0 + raw.max(0.0)),
        }
    }

    /// Non-negative-ish distance used while building graph neighborhoods
    #[inline]
    pub fn graph_distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance_inline::dot(a, b),
            Metric::InnerProduct => -distance_inline::dot(a, b),
            Metric::Euclidean => distance_inline::l2_squared(a, b),
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::Euclidean => 1,
            Metric::InnerProduct => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::Euclidean),
            2 => Some(Metric::InnerProduct),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = SimilarityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "inner_product" | "ip" => Ok(Metric::InnerProduct),
            other => Err(SimilarityError::InvalidConfig(format!(
                "unknown metric '{other}'"
            ))),
        }
    }
}

/// Nearest-neighbor algorithm behind a [`VectorIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Exact brute-force scan
    Flat,
    /// Approximate Vamana proximity graph
    Graph,
}

impl Backend {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Backend::Flat => 0,
            Backend::Graph => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Backend::Flat),
            1 => Some(Backend::Graph),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Flat => "flat",
            Backend::Graph => "graph",
        }
    }

    pub fn is_exact(self) -> bool {
        matches!(self, Backend::Flat)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = SimilarityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "flat" | "exact" => Ok(Backend::Flat),
            "graph" | "vamana" | "approximate" => Ok(Backend::Graph),
            other => Err(SimilarityError::InvalidConfig(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

/// Tuning knobs for the graph backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VamanaConfig {
    /// Maximum out-degree per node (R)
    pub max_degree: usize,
    /// Beam width during construction and search (L)
    pub search_list_size: usize,
    /// Pruning slack; 1.0 keeps only strictly closer neighbors
    pub alpha: f32,
}

impl Default for VamanaConfig {
    fn default() -> Self {
        Self {
            max_degree: 32,
            search_list_size: 75,
            alpha: 1.2,
        }
    }
}

/// Construction parameters shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: Metric,
    pub backend: Backend,
    #[serde(default)]
    pub vamana: VamanaConfig,
}

impl IndexConfig {
    pub fn new(dimension: usize, metric: Metric, backend: Backend) -> Self {
        Self {
            dimension,
            metric,
            backend,
            vamana: VamanaConfig::default(),
        }
    }

    pub fn with_vamana(mut self, vamana: VamanaConfig) -> Self {
        self.vamana = vamana;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > u32::MAX as usize {
            return Err(SimilarityError::InvalidConfig(format!(
                "dimension must be in 1..={}, got {}",
                u32::MAX,
                self.dimension
            )));
        }
        if self.backend == Backend::Graph {
            let v = &self.vamana;
            if v.max_degree == 0 || v.max_degree > u16::MAX as usize {
                return Err(SimilarityError::InvalidConfig(format!(
                    "max_degree must be in 1..={}, got {}",
                    u16::MAX,
                    v.max_degree
                )));
            }
            if v.search_list_size == 0 || v.search_list_size > u32::MAX as usize {
                return Err(SimilarityError::InvalidConfig(
                    "search_list_size must be positive".to_string(),
                ));
            }
            if !(v.alpha >= 1.0 && v.alpha.is_finite()) {
                return Err(SimilarityError::InvalidConfig(format!(
                    "alpha must be a finite value >= 1.0, got {}",
                    v.alpha
                )));
            }
        }
        Ok(())
    }
}

/// One search hit: handle plus raw metric score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub handle: ItemHandle,
    pub score: f32,
}

/// Contract every nearest-neighbor backend satisfies.
///
/// Handles are assigned densely in insertion order. A failed `add` or
/// `add_batch` leaves the index untouched.
pub trait VectorIndex: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn metric(&self) -> Metric;

    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, vector: &[f32]) -> Result<ItemHandle>;

    /// Equivalent to calling `add` for each vector in order, but validates
    /// the whole batch first.
    fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ItemHandle>>;

    /// Best-first neighbors of `query`; ties go to the lower handle.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Stored vector (post-normalization for cosine)
    fn reconstruct(&self, handle: ItemHandle) -> Result<Vec<f32>>;

    fn serialize(&self) -> Vec<u8>;
}

/// Construct an empty index for `config`
pub fn try_create(config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    config.validate()?;
    match config.backend {
        Backend::Flat => Ok(Box::new(FlatIndex::new(config.dimension, config.metric))),
        Backend::Graph => create_graph(config),
    }
}

#[cfg(feature = "graph-index")]
fn create_graph(config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    Ok(Box::new(VamanaIndex::new(
        config.dimension,
        config.metric,
        config.vamana,
    )))
}

#[cfg(not(feature = "graph-index"))]
fn create_graph(_config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    Err(SimilarityError::BackendUnavailable(Backend::Graph))
}

/// Rebuild an index from bytes produced by [`VectorIndex::serialize`]
pub fn deserialize(bytes: &[u8]) -> Result<Box<dyn VectorIndex>> {
    from_payload(persist::decode(bytes)?)
}

pub(crate) fn from_payload(payload: persist::Payload) -> Result<Box<dyn VectorIndex>> {
    match payload.backend {
        Backend::Flat => Ok(Box::new(FlatIndex::from_store(payload.store))),
        Backend::Graph => graph_from_payload(payload),
    }
}

#[cfg(feature = "graph-index")]
fn graph_from_payload(payload: persist::Payload) -> Result<Box<dyn VectorIndex>> {
    Ok(Box::new(VamanaIndex::from_parts(
        payload.store,
        payload.graph,
        payload.vamana,
        payload.entry_point,
    )))
}

#[cfg(not(feature = "graph-index"))]
fn graph_from_payload(_payload: persist::Payload) -> Result<Box<dyn VectorIndex>> {
    Err(SimilarityError::BackendUnavailable(Backend::Graph))
}

/// Order candidates best-first and keep the top `k`
pub(crate) fn rank_top_k(metric: Metric, mut hits: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    let cmp = |a: &Neighbor, b: &Neighbor| -> Ordering {
        metric
            .rank_key(a.score)
            .total_cmp(&metric.rank_key(b.score))
            .then(a.handle.cmp(&b.handle))
    };
    if k < hits.len() {
        hits.select_nth_unstable_by(k, cmp);
        hits.truncate(k);
    }
    hits.sort_unstable_by(cmp);
    hits
}
