//! Binary payload format for persisted vector indexes
//!
//! # File Format (v1)
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Header (64 bytes)                       │
//! │ ├── magic: [u8; 4] = "SIMX"             │
//! │ ├── version: u32 = 1                    │
//! │ ├── num_vectors: u64                    │
//! │ ├── dimension: u32                      │
//! │ ├── backend: u8                         │
//! │ ├── metric: u8                          │
//! │ ├── max_degree: u32                     │
//! │ ├── search_list_size: u32               │
//! │ ├── alpha: f32                          │
//! │ ├── entry_point: u32                    │
//! │ ├── checksum: u64                       │
//! │ └── reserved: [u8; 18]                  │
//! ├─────────────────────────────────────────┤
//! │ Graph Section (graph backend only)      │
//! │ ├── For each node:                      │
//! │ │   ├── neighbor_count: u16             │
//! │ │   └── neighbors: [u32; neighbor_count]│
//! ├─────────────────────────────────────────┤
//! │ Vectors Section (aligned to 64 bytes)   │
//! │ └── [[f32; dimension]; num_vectors]     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The checksum covers everything after the header.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapMut};
use tracing::info;

use super::storage::VectorStore;
use super::{Backend, Metric, VamanaConfig};
use crate::error::{Result, SimilarityError};

const MAGIC: [u8; 4] = *b"SIMX";
const VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 64;
const ALIGNMENT: usize = 64;

/// Parsed header of a persisted payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PayloadHeader {
    pub num_vectors: u64,
    pub dimension: u32,
    pub backend: Backend,
    pub metric: Metric,
    pub vamana: VamanaConfig,
    pub entry_point: u32,
    pub checksum: u64,
}

impl PayloadHeader {
    pub fn flat(store: &VectorStore) -> Self {
        Self {
            num_vectors: store.len() as u64,
            dimension: store.dimension() as u32,
            backend: Backend::Flat,
            metric: store.metric(),
            vamana: VamanaConfig::default(),
            entry_point: 0,
            checksum: 0,
        }
    }

    #[cfg_attr(not(feature = "graph-index"), allow(dead_code))]
    pub fn graph(store: &VectorStore, vamana: VamanaConfig, entry_point: u32) -> Self {
        Self {
            backend: Backend::Graph,
            vamana,
            entry_point,
            ..Self::flat(store)
        }
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4..8].copy_from_slice(&VERSION.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.num_vectors.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.dimension.to_le_bytes());
        bytes[20] = self.backend.tag();
        bytes[21] = self.metric.tag();
        bytes[22..26].copy_from_slice(&(self.vamana.max_degree as u32).to_le_bytes());
        bytes[26..30].copy_from_slice(&(self.vamana.search_list_size as u32).to_le_bytes());
        bytes[30..34].copy_from_slice(&self.vamana.alpha.to_le_bytes());
        bytes[34..38].copy_from_slice(&self.entry_point.to_le_bytes());
        bytes[38..46].copy_from_slice(&self.checksum.to_le_bytes());
        // reserved bytes already 0
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(corrupt("header too small"));
        }
        if bytes[0..4] != MAGIC {
            return Err(corrupt(format!("invalid magic bytes: {:?}", &bytes[0..4])));
        }
        let version = read_u32(bytes, 4);
        if version != VERSION {
            return Err(corrupt(format!("unsupported version: {version}")));
        }
        let backend = Backend::from_tag(bytes[20])
            .ok_or_else(|| corrupt(format!("unknown backend tag {}", bytes[20])))?;
        let metric = Metric::from_tag(bytes[21])
            .ok_or_else(|| corrupt(format!("unknown metric tag {}", bytes[21])))?;
        let dimension = read_u32(bytes, 16);
        if dimension == 0 {
            return Err(corrupt("zero dimension"));
        }

        Ok(Self {
            num_vectors: read_u64(bytes, 8),
            dimension,
            backend,
            metric,
            vamana: VamanaConfig {
                max_degree: read_u32(bytes, 22) as usize,
                search_list_size: read_u32(bytes, 26) as usize,
                alpha: f32::from_le_bytes([bytes[30], bytes[31], bytes[32], bytes[33]]),
            },
            entry_point: read_u32(bytes, 34),
            checksum: read_u64(bytes, 38),
        })
    }
}

/// Decoded payload, ready to become a backend
#[derive(Debug)]
pub(crate) struct Payload {
    pub backend: Backend,
    pub store: VectorStore,
    #[cfg_attr(not(feature = "graph-index"), allow(dead_code))]
    pub graph: Vec<Vec<u32>>,
    pub vamana: VamanaConfig,
    #[cfg_attr(not(feature = "graph-index"), allow(dead_code))]
    pub entry_point: u32,
}

fn corrupt(reason: impl Into<String>) -> SimilarityError {
    SimilarityError::corruption("<payload>", reason)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// FNV-1a over the payload body
fn compute_checksum(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Align offset to boundary
fn align_to(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Serialize header, optional adjacency lists and row-major vectors
pub(crate) fn encode(
    header: &PayloadHeader,
    graph: Option<&[Vec<u32>]>,
    vectors: &[f32],
) -> Vec<u8> {
    let graph_size: usize = graph
        .map(|g| g.iter().map(|n| 2 + n.len() * 4).sum())
        .unwrap_or(0);
    let vectors_offset = align_to(HEADER_SIZE + graph_size, ALIGNMENT);
    let mut out = Vec::with_capacity(vectors_offset + vectors.len() * 4);
    out.resize(HEADER_SIZE, 0);

    if let Some(graph) = graph {
        for neighbors in graph {
            out.extend_from_slice(&(neighbors.len() as u16).to_le_bytes());
            for &n in neighbors {
                out.extend_from_slice(&n.to_le_bytes());
            }
        }
    }
    out.resize(vectors_offset, 0);
    for v in vectors {
        out.extend_from_slice(&v.to_le_bytes());
    }

    let header = PayloadHeader {
        checksum: compute_checksum(&out[HEADER_SIZE..]),
        ..*header
    };
    out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    out
}

/// Parse and validate a payload produced by [`encode`]
pub(crate) fn decode(bytes: &[u8]) -> Result<Payload> {
    let header = PayloadHeader::from_bytes(bytes)?;

    let computed = compute_checksum(&bytes[HEADER_SIZE..]);
    if header.checksum != computed {
        return Err(corrupt(format!(
            "checksum mismatch: stored={}, computed={computed}",
            header.checksum
        )));
    }

    let num_vectors = usize::try_from(header.num_vectors)
        .map_err(|_| corrupt("vector count exceeds address space"))?;
    if num_vectors > u32::MAX as usize {
        return Err(corrupt("vector count exceeds handle space"));
    }
    let dimension = header.dimension as usize;

    let mut offset = HEADER_SIZE;
    let mut graph = Vec::new();
    if header.backend == Backend::Graph {
        graph.reserve(num_vectors);
        for node in 0..num_vectors {
            let count_end = offset + 2;
            if count_end > bytes.len() {
                return Err(corrupt(format!("graph section truncated at node {node}")));
            }
            let count = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
            offset = count_end;
            let list_end = offset + count * 4;
            if list_end > bytes.len() {
                return Err(corrupt(format!("neighbor list truncated at node {node}")));
            }
            let mut neighbors = Vec::with_capacity(count);
            for _ in 0..count {
                let n = read_u32(bytes, offset);
                if n as usize >= num_vectors {
                    return Err(corrupt(format!("node {node} links to missing node {n}")));
                }
                neighbors.push(n);
                offset += 4;
            }
            graph.push(neighbors);
        }
        if num_vectors > 0 && header.entry_point as usize >= num_vectors {
            return Err(corrupt("entry point out of range"));
        }
    }

    let vectors_offset = align_to(offset, ALIGNMENT);
    let expected_len = num_vectors
        .checked_mul(dimension)
        .and_then(|floats| floats.checked_mul(4))
        .and_then(|size| size.checked_add(vectors_offset))
        .ok_or_else(|| corrupt("vector section size overflows"))?;
    if bytes.len() != expected_len {
        return Err(corrupt(format!(
            "vector section size mismatch: expected {expected_len} bytes, found {}",
            bytes.len()
        )));
    }

    let vectors: Vec<f32> = bytes[vectors_offset..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(Payload {
        backend: header.backend,
        store: VectorStore::from_raw(dimension, header.metric, vectors),
        graph,
        vamana: header.vamana,
        entry_point: header.entry_point,
    })
}

/// Write payload bytes to `path` and flush them to disk
pub(crate) fn write_payload_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let start = std::time::Instant::now();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(bytes.len() as u64)?;

    // SAFETY: the file was just truncated and sized by us; no other mapping exists.
    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    mmap.copy_from_slice(bytes);
    mmap.flush()?;

    info!(
        path = %path.display(),
        bytes = bytes.len(),
        elapsed = ?start.elapsed(),
        "Wrote index payload"
    );
    Ok(())
}

/// Memory-map `path` and decode it
pub(crate) fn read_payload_file(path: &Path) -> Result<Payload> {
    let mmap = map_payload(path)?;
    decode(&mmap).map_err(|e| with_path(e, path))
}

/// Check header and checksum without building an index
pub(crate) fn verify_payload_file(path: &Path) -> Result<bool> {
    let mmap = map_payload(path)?;
    let header = match PayloadHeader::from_bytes(&mmap) {
        Ok(header) => header,
        Err(_) => return Ok(false),
    };
    Ok(header.checksum == compute_checksum(&mmap[HEADER_SIZE..]))
}

fn map_payload(path: &Path) -> Result<Mmap> {
    if !path.exists() {
        return Err(SimilarityError::corruption(path, "index payload not found"));
    }
    let file = File::open(path)?;
    if (file.metadata()?.len() as usize) < HEADER_SIZE {
        return Err(SimilarityError::corruption(path, "payload shorter than header"));
    }
    // SAFETY: read-only mapping; callers copy everything out before returning.
    Ok(unsafe { Mmap::map(&file)? })
}

/// Attach the real file path to a corruption error raised while decoding
pub(crate) fn with_path(err: SimilarityError, path: &Path) -> SimilarityError {
    match err {
        SimilarityError::StorageCorruption { reason, .. } => {
            SimilarityError::corruption(path, reason)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_store() -> VectorStore {
        let mut store = VectorStore::new(4, Metric::Cosine);
        store.push(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        store.push(&[0.0, 1.0, 0.0, 0.0]).unwrap();
        store.push(&[0.5, 0.5, 0.0, 0.0]).unwrap();
        store
    }

    #[test]
    fn test_header_serialization() {
        let header = PayloadHeader {
            num_vectors: 1000,
            dimension: 384,
            backend: Backend::Graph,
            metric: Metric::Euclidean,
            vamana: VamanaConfig {
                max_degree: 32,
                search_list_size: 80,
                alpha: 1.3,
            },
            entry_point: 42,
            checksum: 7,
        };
        let restored = PayloadHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(restored, header);
    }

    #[test]
    fn test_encode_decode_with_graph() {
        let store = sample_store();
        let graph = vec![vec![1, 2], vec![0], vec![0, 1]];
        let header = PayloadHeader::graph(&store, VamanaConfig::default(), 0);
        let bytes = encode(&header, Some(&graph), store.raw());
        assert_eq!((bytes.len() - HEADER_SIZE) % 4, 0);

        let payload = decode(&bytes).unwrap();
        assert_eq!(payload.backend, Backend::Graph);
        assert_eq!(payload.graph, graph);
        assert_eq!(payload.store, store);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let store = sample_store();
        let mut bytes = encode(&PayloadHeader::flat(&store), None, store.raw());
        bytes[HEADER_SIZE + 10] ^= 0xFF;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, SimilarityError::StorageCorruption { .. }));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let store = sample_store();
        let bytes = encode(&PayloadHeader::flat(&store), None, store.raw());
        assert!(decode(&bytes[..HEADER_SIZE - 1]).is_err());
        assert!(decode(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let store = sample_store();
        let mut bytes = encode(&PayloadHeader::flat(&store), None, store.raw());
        bytes[0] = b'X';
        assert!(matches!(
            decode(&bytes),
            Err(SimilarityError::StorageCorruption { .. })
        ));
    }

    #[test]
    fn test_file_round_trip_and_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.index");
        let store = sample_store();
        let bytes = encode(&PayloadHeader::flat(&store), None, store.raw());

        write_payload_file(&path, &bytes).unwrap();
        assert!(verify_payload_file(&path).unwrap());

        let payload = read_payload_file(&path).unwrap();
        assert_eq!(payload.store, store);

        let missing = dir.path().join("missing.index");
        assert!(matches!(
            read_payload_file(&missing),
            Err(SimilarityError::StorageCorruption { .. })
        ));
    }
}
