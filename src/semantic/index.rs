//! In-memory vector index with exact nearest-neighbor search.
//!
//! Stores note embeddings in insertion order and answers k-NN queries by
//! brute-force squared Euclidean distance. Exactness over approximate recall
//! is intentional at this scale.

use std::collections::HashSet;

/// A single search hit: note id and squared Euclidean distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: u64,
    pub distance: f32,
}

/// Exact vector index over note embeddings.
///
/// Entries are kept in insertion order, which makes persistence byte-stable
/// and gives a deterministic tie-break: of two vectors at equal distance,
/// the one inserted earlier ranks first.
pub struct VectorIndex {
    ids: Vec<u64>,
    vectors: Vec<Vec<f32>>,
    present: HashSet<u64>,
    dimension: usize,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("id {0} is already indexed")]
    DuplicateId(u64),
}

impl VectorIndex {
    /// Create a new empty index for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            ids: Vec::new(),
            vectors: Vec::new(),
            present: HashSet::new(),
            dimension,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            vectors: Vec::with_capacity(capacity),
            present: HashSet::with_capacity(capacity),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.present.contains(&id)
    }

    /// All note ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[f32])> {
        self.ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, v)| (*id, v.as_slice()))
    }

    /// Append an entry. The id must not already be present; the store is
    /// append-only, so a duplicate insert indicates an orchestrator bug.
    pub fn insert(&mut self, id: u64, vector: Vec<f32>) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        if !self.present.insert(id) {
            return Err(IndexError::DuplicateId(id));
        }

        self.ids.push(id);
        self.vectors.push(vector);

        Ok(())
    }

    /// Remove an entry by note id.
    ///
    /// Only used by the catalog's compensating actions (ingest rollback and
    /// startup reconciliation); there is no user-facing deletion.
    pub fn remove(&mut self, id: u64) -> Option<Vec<f32>> {
        if !self.present.remove(&id) {
            return None;
        }

        let pos = self.ids.iter().position(|i| *i == id)?;
        self.ids.remove(pos);
        Some(self.vectors.remove(pos))
    }

    /// Find the `k` entries nearest to `query` by squared Euclidean distance.
    ///
    /// Returns `min(k, len)` hits in ascending distance order. An empty index
    /// yields an empty result, not an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, v)| (Self::squared_l2(query, v), pos))
            .collect();

        // Ascending by distance; insertion position breaks ties.
        scored.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, pos)| Hit {
                id: self.ids[pos],
                distance,
            })
            .collect())
    }

    fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum()
    }
}
