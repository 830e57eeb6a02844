//! Note data model and the durable record store.
//!
//! The record store is the single source of truth for note content. Notes
//! are append-only: the only removal path is the catalog's rollback of a
//! failed ingest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Errors that can occur in the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("note content is empty")]
    EmptyContent,

    #[error("note {0} not found")]
    NotFound(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed record store: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Hash for Note {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NoteCreate {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Durable key -> content mapping with monotonic id assignment.
pub trait NoteStore: Send + Sync {
    /// Validate and persist a new note, assigning the next id.
    fn create(&self, note: NoteCreate) -> Result<Note, StoreError>;

    fn get(&self, id: u64) -> Result<Note, StoreError>;

    /// All notes, newest first. Each call re-reads current state.
    fn list_all(&self) -> Result<Vec<Note>, StoreError>;

    /// All note ids, in storage order.
    fn ids(&self) -> Result<Vec<u64>, StoreError>;

    /// Best-effort removal. Exists solely so the catalog can compensate a
    /// failed ingest; there is no user-facing note deletion.
    fn delete(&self, id: u64) -> Result<(), StoreError>;
}

const CSV_HEADERS: [&str; 4] = ["id", "content", "category", "created_at"];

/// CSV-backed note store. The whole file is rewritten to a temp file and
/// renamed into place on every mutation.
#[derive(Debug, Clone)]
pub struct BackendCsv {
    list: Arc<RwLock<Vec<Note>>>,
    path: PathBuf,
}

impl BackendCsv {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("creating new note database at {}", path.display());
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut notes = vec![];
        for record in csv_reader.records() {
            let record = record?;
            let id = record
                .get(0)
                .ok_or_else(|| StoreError::Malformed("missing id column".into()))?
                .parse::<u64>()
                .map_err(|e| StoreError::Malformed(format!("bad note id: {e}")))?;
            let content = record
                .get(1)
                .ok_or_else(|| StoreError::Malformed("missing content column".into()))?
                .to_string();
            let category = record
                .get(2)
                .ok_or_else(|| StoreError::Malformed("missing category column".into()))?
                .to_string();
            let created_at = record
                .get(3)
                .ok_or_else(|| StoreError::Malformed("missing created_at column".into()))?
                .parse::<DateTime<Utc>>()
                .map_err(|e| StoreError::Malformed(format!("bad created_at: {e}")))?;

            notes.push(Note {
                id,
                content,
                category: if category.is_empty() {
                    None
                } else {
                    Some(category)
                },
                created_at,
            });
        }

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(notes)),
            path: path.to_path_buf(),
        })
    }

    fn save(&self, notes: &[Note]) -> Result<(), StoreError> {
        let temp_path = self.path.with_extension("csv.tmp");
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for note in notes {
            let id = note.id.to_string();
            let created_at = note.created_at.to_rfc3339();
            csv_wrt.write_record([
                id.as_str(),
                note.content.as_str(),
                note.category.as_deref().unwrap_or_default(),
                created_at.as_str(),
            ])?;
        }
        csv_wrt.flush()?;
        drop(csv_wrt);
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl NoteStore for BackendCsv {
    fn create(&self, note_create: NoteCreate) -> Result<Note, StoreError> {
        let content = note_create.content.trim().to_string();
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }

        let category = note_create
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let mut notes = self.list.write().unwrap();

        // Monotonic: one past the highest id ever assigned to a live note.
        let id = notes.iter().map(|n| n.id).max().map_or(1, |max| max + 1);

        let note = Note {
            id,
            content,
            category,
            created_at: Utc::now(),
        };

        notes.push(note.clone());

        if let Err(err) = self.save(&notes) {
            // The write never became durable; keep memory consistent with disk.
            notes.pop();
            return Err(err);
        }

        Ok(note)
    }

    fn get(&self, id: u64) -> Result<Note, StoreError> {
        self.list
            .read()
            .unwrap()
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn list_all(&self) -> Result<Vec<Note>, StoreError> {
        let mut notes = self.list.read().unwrap().clone();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(notes)
    }

    fn ids(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self.list.read().unwrap().iter().map(|n| n.id).collect())
    }

    fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut notes = self.list.write().unwrap();

        let pos = notes
            .iter()
            .position(|n| n.id == id)
            .ok_or(StoreError::NotFound(id))?;

        let removed = notes.remove(pos);

        if let Err(err) = self.save(&notes) {
            notes.insert(pos, removed);
            return Err(err);
        }

        Ok(())
    }
}
