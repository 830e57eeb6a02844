//! Embedding capability consumed by the note catalog.
//!
//! The catalog depends on the `Embedder` trait, never on a concrete model,
//! so tests can inject deterministic doubles. `FastembedEmbedder` is the
//! production implementation backed by fastembed, with lazy model download
//! into a configurable cache directory.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("model initialization failed: {0}")]
    InitFailed(String),

    #[error("embedding generation failed: {0}")]
    Failed(String),

    #[error("invalid model name: {0}")]
    InvalidModel(String),
}

/// Text-to-vector capability with a fixed output dimension.
///
/// Implementations must be deterministic: the same input text yields the
/// same vector for the lifetime of one loaded model. `model_id` identifies
/// the model version so a persisted index can reject vectors produced by a
/// different model.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Output vector length, fixed per model.
    fn dimension(&self) -> usize;

    /// Stable identifier of the loaded model, stored in the index file header.
    fn model_id(&self) -> [u8; 32];
}

/// Embedder backed by fastembed's `TextEmbedding`.
/// Uses a Mutex because fastembed's embed() requires `&mut self`.
pub struct FastembedEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastembedEmbedder {
    /// Create a new embedder with the given model name.
    ///
    /// The model is downloaded on first use if not cached; models are cached
    /// in the `models/` subdirectory of `cache_dir`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbedderError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbedderError::InitFailed(format!("failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        // Model init may download weights; bound it so a dead mirror surfaces
        // as an error instead of hanging startup.
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(TextEmbedding::try_new(options));
        });

        let mut model = match rx.recv_timeout(timeout) {
            Ok(Ok(model)) => model,
            Ok(Err(e)) => return Err(EmbedderError::InitFailed(e.to_string())),
            Err(_) => {
                return Err(EmbedderError::InitFailed(format!(
                    "model download timed out after {} seconds",
                    timeout.as_secs()
                )))
            }
        };

        let dimension = Self::probe_dimension(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbedderError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
            _ => Err(EmbedderError::InvalidModel(format!(
                "unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Probe the model to determine its output dimension.
    fn probe_dimension(model: &mut TextEmbedding) -> Result<usize, EmbedderError> {
        let probe = model
            .embed(vec!["probe"], None)
            .map_err(|e| EmbedderError::InitFailed(format!("failed to probe dimension: {}", e)))?;

        probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbedderError::InitFailed("model returned no embedding".to_string()))
    }
}

impl Embedder for FastembedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| EmbedderError::Failed(format!("failed to acquire model lock: {}", e)))?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbedderError::Failed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::Failed("no embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> [u8; 32] {
        model_id_hash(&self.model_name)
    }
}

/// SHA256 hash of a model name, used as the model identifier in the vector
/// file header.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}
