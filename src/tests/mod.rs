//! Integration tests for the note catalog and record store.
//!
//! Tests run against `MockEmbedder`, a deterministic in-process embedder, so
//! no model download is needed. Tests that exercise a real model are marked
//! `#[ignore]` and run with `cargo test -- --ignored`.

mod catalog;

use crate::semantic::{model_id_hash, Embedder, EmbedderError};
use std::hash::{Hash, Hasher};

/// Deterministic embedder for tests: the vector is derived purely from the
/// text bytes, so identical input always yields an identical vector.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(deterministic_vector(text, self.dimension))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> [u8; 32] {
        model_id_hash("mock")
    }
}

/// Pseudo-random but fully deterministic vector seeded from the text.
pub fn deterministic_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    let mut state = hasher.finish();

    (0..dimension)
        .map(|_| {
            // splitmix64
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            ((z >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        })
        .collect()
}
