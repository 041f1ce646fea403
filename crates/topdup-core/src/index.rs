//! Nearest-neighbour index over document embeddings.
//!
//! [`VectorIndex`] is the contract the retriever consumes. Staleness with
//! respect to the owning store is the retriever's concern; an index only
//! knows the `(id, vector)` pairs it was given. [`FlatIndex`] is the default
//! exact engine.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, l2_normalize, read_artifact, write_artifact};
use crate::error::{DedupError, Result};

/// One result of a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    /// Cosine distance, `1 - cosine similarity`. Lower is closer.
    pub distance: f32,
}

pub trait VectorIndex: Send + Sync {
    fn dims(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: &str) -> bool;

    /// All ids currently indexed.
    fn ids(&self) -> Vec<String>;

    /// The stored vector for `id`, if indexed.
    fn vector(&self, id: &str) -> Option<Vec<f32>>;

    /// Replace the contents wholesale.
    fn rebuild(&mut self, entries: Vec<(String, Vec<f32>)>) -> Result<()>;

    /// Add or overwrite entries.
    fn add(&mut self, entries: Vec<(String, Vec<f32>)>) -> Result<()>;

    /// The `k` closest entries to `vector`, closest first.
    fn nearest(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    fn save(&self, path: &Path) -> Result<()>;

    fn load(&mut self, path: &Path) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct FlatSnapshot {
    dims: usize,
    entries: BTreeMap<String, Vec<f32>>,
}

/// Exact brute-force cosine index.
///
/// Vectors are normalised on insert. Ties in distance are broken by id so
/// query results are deterministic.
pub struct FlatIndex {
    dims: usize,
    entries: BTreeMap<String, Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: BTreeMap::new(),
        }
    }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(DedupError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn insert_all(&mut self, entries: Vec<(String, Vec<f32>)>) -> Result<()> {
        for (_, v) in &entries {
            self.check(v)?;
        }
        for (id, mut v) in entries {
            l2_normalize(&mut v);
            self.entries.insert(id, v);
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn vector(&self, id: &str) -> Option<Vec<f32>> {
        self.entries.get(id).cloned()
    }

    fn rebuild(&mut self, entries: Vec<(String, Vec<f32>)>) -> Result<()> {
        let mut fresh = FlatIndex::new(self.dims);
        fresh.insert_all(entries)?;
        self.entries = fresh.entries;
        Ok(())
    }

    fn add(&mut self, entries: Vec<(String, Vec<f32>)>) -> Result<()> {
        self.insert_all(entries)
    }

    fn nearest(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check(vector)?;
        let mut hits: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|(id, v)| Neighbor {
                id: id.clone(),
                distance: 1.0 - cosine_similarity(vector, v),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_artifact(
            path,
            &FlatSnapshot {
                dims: self.dims,
                entries: self.entries.clone(),
            },
        )
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let snapshot: FlatSnapshot = read_artifact(path)?;
        if snapshot.dims != self.dims {
            return Err(DedupError::DimensionMismatch {
                expected: self.dims,
                actual: snapshot.dims,
            });
        }
        self.entries = snapshot.entries;
        Ok(())
    }
}
