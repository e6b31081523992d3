//! In-memory vector index with cosine similarity search.
//!
//! Vectors are L2-normalized on insert, so cosine similarity reduces to an
//! inner product at query time. One fixed dimension per index (and per
//! deployment); a mismatch is a programmer error and surfaces as such.

use std::collections::BTreeMap;

use super::DropFilter;

/// A scored hit from the vector index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub id: u64,
    /// Cosine similarity with the query vector.
    pub score: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot store or search with a zero-norm vector")]
    ZeroNorm,
}

/// In-memory dense-vector index keyed by page id.
///
/// A soft capacity acts as a safety net: when an insert would grow the index
/// past the cap, the entry with the numerically smallest id is dropped. The
/// primary eviction path is the frequency engine; this guard only bounds
/// memory if that path falls behind.
pub struct VectorIndex {
    /// page id -> normalized embedding; BTreeMap keeps the smallest id at hand
    entries: BTreeMap<u64, Vec<f32>>,
    dimension: usize,
    soft_cap: usize,
}

impl VectorIndex {
    pub fn new(dimension: usize, soft_cap: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            dimension,
            soft_cap: soft_cap.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert a vector, normalizing it first.
    pub fn add(&mut self, id: u64, embedding: Vec<f32>) -> Result<(), VectorError> {
        let normalized = self.normalize(embedding)?;

        if !self.entries.contains_key(&id) {
            while self.entries.len() >= self.soft_cap {
                if let Some((&smallest, _)) = self.entries.first_key_value() {
                    self.entries.remove(&smallest);
                    log::warn!("vector index at soft cap, dropped entry for page {smallest}");
                } else {
                    break;
                }
            }
        }

        self.entries.insert(id, normalized);
        Ok(())
    }

    /// Remove an entry. Unknown ids are ignored (idempotent delete).
    pub fn remove(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    /// Insert-or-overwrite the vector for `id`.
    pub fn replace(&mut self, id: u64, embedding: Vec<f32>) -> Result<(), VectorError> {
        self.add(id, embedding)
    }

    /// Top-`k` entries by cosine similarity, ties broken by higher id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, VectorError> {
        let query = self.normalize(query.to_vec())?;

        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|(&id, vec)| VectorHit {
                id,
                score: dot(&query, vec),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.id.cmp(&a.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Like [`search`](Self::search) but with the low-similarity tail cut
    /// off at the first large score drop.
    pub fn filtered_search(
        &self,
        query: &[f32],
        k: usize,
        filter: &DropFilter,
    ) -> Result<Vec<VectorHit>, VectorError> {
        let mut hits = self.search(query, k)?;
        let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
        hits.truncate(filter.cutoff(&scores));
        Ok(hits)
    }

    fn normalize(&self, mut v: Vec<f32>) -> Result<Vec<f32>, VectorError> {
        if v.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: v.len(),
            });
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Err(VectorError::ZeroNorm);
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
