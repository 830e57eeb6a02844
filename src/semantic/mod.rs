//! Semantic embedding infrastructure for note search.
//!
//! # Architecture
//!
//! - `embedder`: the text-to-vector capability (trait + fastembed impl)
//! - `index`: exact brute-force k-NN index over note embeddings
//! - `storage`: binary file I/O for vectors.bin persistence

pub mod embedder;
mod index;
mod storage;

pub use embedder::{model_id_hash, Embedder, EmbedderError, FastembedEmbedder};
pub use index::{Hit, IndexError, VectorIndex};
pub use storage::{VectorStorage, VectorStorageError};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
