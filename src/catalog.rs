//! The note catalog: orchestrates the record store, the embedder, and the
//! vector index so that every persisted note has exactly one vector and
//! vice versa.
//!
//! Ingest runs record write -> embed -> index insert -> index persist, fully
//! serialized behind a mutex (the index file is rewritten whole, so racing
//! writers would lose entries). On any failure after the record write the
//! catalog rolls the record back; startup reconciliation repairs whatever a
//! crash left behind.

use crate::notes::{Note, NoteCreate, NoteStore, StoreError};
use crate::semantic::{
    Embedder, EmbedderError, IndexError, VectorIndex, VectorStorage, VectorStorageError,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::time::Duration;

/// Stable error kinds surfaced by the catalog. Callers decide retry vs.
/// abort on the kind, never on message text.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector index was built by a different embedding model")]
    ModelMismatch,

    #[error("note {0} is already indexed")]
    DuplicateId(u64),

    #[error("note {0} not found")]
    NotFound(u64),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("embedding timed out after {0} seconds")]
    EmbeddingTimeout(u64),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyContent => CatalogError::Validation("note content is empty".into()),
            StoreError::NotFound(id) => CatalogError::NotFound(id),
            other => CatalogError::Storage(other.to_string()),
        }
    }
}

impl From<IndexError> for CatalogError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                CatalogError::DimensionMismatch { expected, got }
            }
            IndexError::DuplicateId(id) => CatalogError::DuplicateId(id),
        }
    }
}

impl From<VectorStorageError> for CatalogError {
    fn from(err: VectorStorageError) -> Self {
        match err {
            VectorStorageError::DimensionMismatch { expected, got } => {
                CatalogError::DimensionMismatch { expected, got }
            }
            VectorStorageError::ModelMismatch => CatalogError::ModelMismatch,
            other => CatalogError::Storage(other.to_string()),
        }
    }
}

impl From<EmbedderError> for CatalogError {
    fn from(err: EmbedderError) -> Self {
        CatalogError::EmbeddingFailure(err.to_string())
    }
}

/// A search hit resolved against the record store.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Squared Euclidean distance to the query embedding; smaller is closer.
    pub distance: f32,
}

/// Outcome of a startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Notes that were present in the store but missing from the index and
    /// have now been embedded and indexed.
    pub indexed: usize,
    /// Index entries without a backing note that have been dropped.
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Expected embedding dimension; validated against the embedder when set.
    pub dimension: Option<usize>,
    pub embed_timeout: Duration,
    pub default_k: usize,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            dimension: None,
            embed_timeout: Duration::from_secs(60),
            default_k: 5,
        }
    }
}

pub struct NoteCatalog {
    store: Box<dyn NoteStore>,
    embedder: Arc<dyn Embedder>,
    index: RwLock<VectorIndex>,
    storage: VectorStorage,
    /// Serializes ingest (and reconciliation) end to end.
    ingest_lock: Mutex<()>,
    embed_timeout: Duration,
    default_k: usize,
}

impl NoteCatalog {
    /// Load or create the vector index at `vectors_path`, then reconcile it
    /// against the record store so identifier coherence holds before any
    /// operation is served.
    pub fn open(
        store: Box<dyn NoteStore>,
        embedder: Arc<dyn Embedder>,
        vectors_path: PathBuf,
        opts: CatalogOptions,
    ) -> Result<Self, CatalogError> {
        let dimension = embedder.dimension();
        if let Some(expected) = opts.dimension {
            if expected != dimension {
                return Err(CatalogError::DimensionMismatch {
                    expected,
                    got: dimension,
                });
            }
        }

        let storage = VectorStorage::new(vectors_path);
        let index = if storage.exists() {
            let index = storage.load(&embedder.model_id(), dimension)?;
            log::info!("loaded {} vectors from storage", index.len());
            index
        } else {
            log::info!("no existing vector index, starting fresh");
            VectorIndex::new(dimension)
        };

        let catalog = Self {
            store,
            embedder,
            index: RwLock::new(index),
            storage,
            ingest_lock: Mutex::new(()),
            embed_timeout: opts.embed_timeout,
            default_k: opts.default_k.max(1),
        };

        let report = catalog.reconcile()?;
        if report != ReconcileReport::default() {
            log::warn!(
                "reconciled stores on startup: {} notes indexed, {} dangling vectors dropped",
                report.indexed,
                report.dropped
            );
        }

        Ok(catalog)
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn indexed_count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Persist a note and its embedding. Either both writes commit or, after
    /// a failure past the record write, the record is rolled back.
    pub fn ingest(&self, note_create: NoteCreate) -> Result<Note, CatalogError> {
        if note_create.content.trim().is_empty() {
            return Err(CatalogError::Validation("note content is empty".into()));
        }

        let _guard = self.ingest_lock.lock().unwrap_or_else(|e| e.into_inner());

        let note = self.store.create(note_create)?;

        let vector = match self.embed_with_timeout(&note.content) {
            Ok(vector) => vector,
            Err(err) => {
                self.rollback_record(note.id);
                return Err(err);
            }
        };

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());

        if let Err(err) = index.insert(note.id, vector) {
            drop(index);
            self.rollback_record(note.id);
            return Err(err.into());
        }

        if let Err(err) = self.storage.save(&index, &self.embedder.model_id()) {
            // The vector never became durable; back out both writes.
            index.remove(note.id);
            drop(index);
            self.rollback_record(note.id);
            return Err(err.into());
        }

        Ok(note)
    }

    /// Embed the query and return the `k` closest notes, ascending by
    /// distance, with their stored content resolved.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, CatalogError> {
        if query.trim().is_empty() {
            return Err(CatalogError::Validation("query is empty".into()));
        }
        if k == 0 {
            return Err(CatalogError::Validation("k must be at least 1".into()));
        }

        let vector = self.embed_with_timeout(query)?;

        let hits = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .search(&vector, k)?;

        let mut results = Vec::with_capacity(hits.len());
        let mut skipped = 0usize;
        for hit in hits {
            match self.store.get(hit.id) {
                Ok(note) => results.push(SearchResult {
                    id: note.id,
                    content: note.content,
                    category: note.category,
                    created_at: note.created_at,
                    distance: hit.distance,
                }),
                Err(StoreError::NotFound(id)) => {
                    // Post-reconciliation this should not happen; skip rather
                    // than fail the whole query.
                    skipped += 1;
                    log::warn!("note {id} is indexed but missing from the record store, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }

        if skipped > 0 {
            log::warn!("search skipped {skipped} dangling index entries");
        }

        Ok(results)
    }

    /// All notes, newest first.
    pub fn list(&self) -> Result<Vec<Note>, CatalogError> {
        Ok(self.store.list_all()?)
    }

    /// Restore identifier coherence between the record store and the index:
    /// unindexed notes are embedded and inserted, vectors without a backing
    /// note are dropped. Persists the index only when something changed.
    pub fn reconcile(&self) -> Result<ReconcileReport, CatalogError> {
        let _guard = self.ingest_lock.lock().unwrap_or_else(|e| e.into_inner());

        let note_ids = self.store.ids()?;
        let note_set: HashSet<u64> = note_ids.iter().copied().collect();

        // Snapshot under a read lock; the ingest lock keeps other writers
        // out, so the snapshot stays valid while we embed.
        let (dangling, unindexed): (Vec<u64>, Vec<u64>) = {
            let index = self.index.read().unwrap_or_else(|e| e.into_inner());
            (
                index.ids().filter(|id| !note_set.contains(id)).collect(),
                note_ids
                    .iter()
                    .copied()
                    .filter(|id| !index.contains(*id))
                    .collect(),
            )
        };

        // Embed outside the index lock so searches keep running during a
        // long repair.
        let mut pending = Vec::with_capacity(unindexed.len());
        for id in unindexed {
            let note = self.store.get(id)?;
            log::info!("indexing unindexed note {id}");
            pending.push((id, self.embed_with_timeout(&note.content)?));
        }

        let mut report = ReconcileReport::default();
        if dangling.is_empty() && pending.is_empty() {
            return Ok(report);
        }

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        for id in dangling {
            log::warn!("dropping vector for missing note {id}");
            index.remove(id);
            report.dropped += 1;
        }
        for (id, vector) in pending {
            index.insert(id, vector)?;
            report.indexed += 1;
        }

        self.storage.save(&index, &self.embedder.model_id())?;

        Ok(report)
    }

    fn rollback_record(&self, id: u64) {
        if let Err(err) = self.store.delete(id) {
            log::warn!(
                "failed to roll back note {id} after ingest failure: {err}; \
                 startup reconciliation will repair it"
            );
        }
    }

    /// Run the embedder on a worker thread so a hung model surfaces as a
    /// timeout instead of blocking the caller. A timed-out embed finishes in
    /// the background and its result is discarded.
    fn embed_with_timeout(&self, text: &str) -> Result<Vec<f32>, CatalogError> {
        let (tx, rx) = mpsc::channel();
        let embedder = self.embedder.clone();
        let text = text.to_string();

        std::thread::spawn(move || {
            let _ = tx.send(embedder.embed(&text));
        });

        match rx.recv_timeout(self.embed_timeout) {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(CatalogError::EmbeddingTimeout(self.embed_timeout.as_secs())),
        }
    }
}
