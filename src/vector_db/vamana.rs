//! Vamana proximity-graph index (approximate)
//!
//! Incremental variant of the DiskANN construction: every new vector runs a
//! greedy beam search from the entry point, keeps a robust-pruned subset of
//! the visited nodes as out-neighbors, and adds reverse edges (re-pruning any
//! node that overflows `max_degree`). Construction is fully deterministic for
//! a given insertion order.
//!
//! Collections no larger than the search list are answered by exact scan, so
//! small indexes rank identically to [`FlatIndex`](super::FlatIndex).

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;

use super::flat::exhaustive_scan;
use super::persist::{self, PayloadHeader};
use super::storage::VectorStore;
use super::{rank_top_k, Backend, ItemHandle, Metric, Neighbor, VamanaConfig, VectorIndex};
use crate::error::Result;

/// (graph distance, node id)
type Candidate = (f32, u32);

fn cmp_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    (a.0 + 0.0).total_cmp(&(b.0 + 0.0)).then(a.1.cmp(&b.1))
}

#[derive(Debug, Clone)]
pub struct VamanaIndex {
    config: VamanaConfig,
    store: VectorStore,
    graph: Vec<Vec<u32>>,
    entry_point: u32,
}

impl VamanaIndex {
    pub fn new(dimension: usize, metric: Metric, config: VamanaConfig) -> Self {
        Self {
            config,
            store: VectorStore::new(dimension, metric),
            graph: Vec::new(),
            entry_point: 0,
        }
    }

    pub(crate) fn from_parts(
        store: VectorStore,
        graph: Vec<Vec<u32>>,
        config: VamanaConfig,
        entry_point: u32,
    ) -> Self {
        Self {
            config,
            store,
            graph,
            entry_point,
        }
    }

    pub fn config(&self) -> &VamanaConfig {
        &self.config
    }

    /// Out-neighbors per node, in handle order
    pub fn graph(&self) -> &[Vec<u32>] {
        &self.graph
    }

    #[inline]
    fn distance_to(&self, query: &[f32], node: u32) -> f32 {
        self.store
            .metric()
            .graph_distance(query, self.store.row(node as usize))
    }

    /// Beam search over the graph.
    ///
    /// Returns the final candidate list (closest first, at most `list_size`)
    /// and every node that was expanded along the way.
    fn greedy_search(&self, query: &[f32], list_size: usize) -> (Vec<Candidate>, Vec<u32>) {
        if self.graph.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let mut seen: HashSet<u32> = HashSet::new();
        let mut expanded: HashSet<u32> = HashSet::new();
        let mut expanded_order = Vec::new();
        let mut list: Vec<Candidate> =
            vec![(self.distance_to(query, self.entry_point), self.entry_point)];
        seen.insert(self.entry_point);

        loop {
            let next = list
                .iter()
                .find(|(_, id)| !expanded.contains(id))
                .map(|&(_, id)| id);
            let Some(current) = next else {
                break;
            };
            expanded.insert(current);
            expanded_order.push(current);

            for &neighbor in &self.graph[current as usize] {
                if seen.insert(neighbor) {
                    list.push((self.distance_to(query, neighbor), neighbor));
                }
            }
            list.sort_by(cmp_candidates);
            list.truncate(list_size);
        }

        (list, expanded_order)
    }

    /// Pick at most `max_degree` diverse neighbors for `node` from `candidates`
    fn robust_prune(&self, node: u32, candidates: impl IntoIterator<Item = u32>) -> Vec<u32> {
        let metric = self.store.metric();
        let base = self.store.row(node as usize);

        let mut pool: Vec<Candidate> = candidates
            .into_iter()
            .filter(|&c| c != node)
            .map(|c| (metric.graph_distance(base, self.store.row(c as usize)), c))
            .collect();
        pool.sort_by(cmp_candidates);
        pool.dedup_by_key(|c| c.1);

        let mut selected = Vec::with_capacity(self.config.max_degree);
        while let Some(&(_, best)) = pool.first() {
            selected.push(best);
            if selected.len() >= self.config.max_degree {
                break;
            }
            let best_row = self.store.row(best as usize);
            let alpha = self.config.alpha;
            pool.retain(|&(d, c)| {
                c != best && alpha * metric.graph_distance(best_row, self.store.row(c as usize)) > d
            });
        }
        selected
    }

    /// Link the most recently stored vector into the graph
    fn insert_node(&mut self, id: u32) {
        if id == 0 {
            self.graph.push(Vec::new());
            self.entry_point = 0;
            return;
        }

        let query = self.store.row(id as usize).to_vec();
        let (list, expanded) = self.greedy_search(&query, self.config.search_list_size);
        let candidates = expanded.into_iter().chain(list.into_iter().map(|(_, c)| c));
        let neighbors = self.robust_prune(id, candidates);
        self.graph.push(neighbors.clone());

        for &neighbor in &neighbors {
            let adjacency = &mut self.graph[neighbor as usize];
            if !adjacency.contains(&id) {
                adjacency.push(id);
            }
            if adjacency.len() > self.config.max_degree {
                let overflow = adjacency.clone();
                let pruned = self.robust_prune(neighbor, overflow);
                self.graph[neighbor as usize] = pruned;
            }
        }
    }
}

impl VectorIndex for VamanaIndex {
    fn backend(&self) -> Backend {
        Backend::Graph
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
        let handle = self.store.push(vector)?;
        self.insert_node(handle.0);
        Ok(handle)
    }

    fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ItemHandle>> {
        let handles = self.store.push_batch(vectors)?;
        for handle in &handles {
            self.insert_node(handle.0);
        }
        debug!(count = handles.len(), nodes = self.graph.len(), "Linked batch into graph");
        Ok(handles)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.store.check(query)?;
        let query = self.store.prepare(query);
        let n = self.store.len();
        if k == 0 || n == 0 {
            return Ok(Vec::new());
        }

        let list_size = self.config.search_list_size.max(k);
        if n <= list_size {
            return Ok(exhaustive_scan(&self.store, &query, k));
        }

        let (list, _) = self.greedy_search(&query, list_size);
        if list.len() < k.min(n) {
            // Graph did not reach enough nodes; fall back to the exact answer
            return Ok(exhaustive_scan(&self.store, &query, k));
        }

        let metric = self.store.metric();
        let hits = list
            .into_iter()
            .map(|(_, id)| Neighbor {
                handle: ItemHandle(id),
                score: metric.score(&query, self.store.row(id as usize)),
            })
            .collect();
        Ok(rank_top_k(metric, hits, k))
    }

    fn reconstruct(&self, handle: ItemHandle) -> Result<Vec<f32>> {
        Ok(self.store.get(handle)?.to_vec())
    }

    fn serialize(&self) -> Vec<u8> {
        let header = PayloadHeader::graph(&self.store, self.config, self.entry_point);
        persist::encode(&header, Some(&self.graph), self.store.raw())
    }
}
