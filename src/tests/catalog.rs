//! Integration tests for the note catalog: ingest/search round-trips,
//! compensation on partial failure, and startup reconciliation.

use super::MockEmbedder;
use crate::catalog::{CatalogError, CatalogOptions, NoteCatalog};
use crate::notes::{BackendCsv, NoteCreate, NoteStore};
use crate::semantic::{model_id_hash, Embedder, EmbedderError, VectorIndex, VectorStorage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DIM: usize = 8;

fn test_options() -> CatalogOptions {
    CatalogOptions {
        dimension: None,
        embed_timeout: Duration::from_secs(5),
        default_k: 5,
    }
}

fn open_catalog(base: &Path, embedder: Arc<dyn Embedder>) -> Result<NoteCatalog, CatalogError> {
    let store = Box::new(BackendCsv::load(&base.join("notes.csv")).unwrap());
    NoteCatalog::open(store, embedder, base.join("vectors.bin"), test_options())
}

fn mock_catalog(base: &Path) -> NoteCatalog {
    open_catalog(base, Arc::new(MockEmbedder::new(DIM))).unwrap()
}

fn ingest(catalog: &NoteCatalog, content: &str) -> crate::notes::Note {
    catalog
        .ingest(NoteCreate {
            content: content.to_string(),
            category: None,
        })
        .unwrap()
}

/// Embedder that fails on a marker substring; everything else embeds
/// deterministically.
struct FailingEmbedder {
    inner: MockEmbedder,
    fail_on: &'static str,
}

impl Embedder for FailingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.contains(self.fail_on) {
            return Err(EmbedderError::Failed("injected failure".to_string()));
        }
        self.inner.embed(text)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_id(&self) -> [u8; 32] {
        self.inner.model_id()
    }
}

/// Embedder that never answers within a test-sized timeout.
struct SlowEmbedder {
    dimension: usize,
}

impl Embedder for SlowEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
        std::thread::sleep(Duration::from_secs(2));
        Ok(vec![0.0; self.dimension])
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> [u8; 32] {
        model_id_hash("mock")
    }
}

#[test]
fn test_ingest_search_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = mock_catalog(dir.path());

    let contents = ["buy milk", "team meeting notes", "morning run"];
    let mut ids = vec![];
    for content in contents {
        ids.push(ingest(&catalog, content).id);
    }
    assert_eq!(ids, vec![1, 2, 3]);

    // The exact original content comes back as the closest hit, distance 0.
    for (content, id) in contents.iter().zip(&ids) {
        let results = catalog.search(content, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, *id);
        assert_eq!(results[0].content, *content);
        assert!(results[0].distance < 1e-6);
    }
}

#[test]
fn test_search_results_ascending_and_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = mock_catalog(dir.path());

    for content in ["alpha", "beta", "gamma"] {
        ingest(&catalog, content);
    }

    let results = catalog.search("alpha", 10).unwrap();
    assert_eq!(results.len(), 3);
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn test_search_empty_catalog_returns_empty() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = mock_catalog(dir.path());

    let results = catalog.search("anything", 5).unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_validation_errors() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = mock_catalog(dir.path());

    let result = catalog.ingest(NoteCreate {
        content: "   ".to_string(),
        category: None,
    });
    assert!(matches!(result, Err(CatalogError::Validation(_))));

    assert!(matches!(
        catalog.search("  ", 5),
        Err(CatalogError::Validation(_))
    ));
    assert!(matches!(
        catalog.search("query", 0),
        Err(CatalogError::Validation(_))
    ));
}

#[test]
fn test_embedding_failure_rolls_back_record() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(FailingEmbedder {
        inner: MockEmbedder::new(DIM),
        fail_on: "poison",
    });
    let catalog = open_catalog(dir.path(), embedder).unwrap();

    ingest(&catalog, "healthy note");

    let result = catalog.ingest(NoteCreate {
        content: "poison pill".to_string(),
        category: None,
    });
    assert!(matches!(result, Err(CatalogError::EmbeddingFailure(_))));

    // The half-written record was compensated: both stores agree.
    let notes = catalog.list().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].content, "healthy note");
    assert_eq!(catalog.indexed_count(), 1);

    // And the state survives a reopen unchanged.
    drop(catalog);
    let reopened = mock_catalog(dir.path());
    assert_eq!(reopened.list().unwrap().len(), 1);
    assert_eq!(reopened.indexed_count(), 1);
}

#[test]
fn test_embedding_timeout_surfaces_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(BackendCsv::load(&dir.path().join("notes.csv")).unwrap());
    let catalog = NoteCatalog::open(
        store,
        Arc::new(SlowEmbedder { dimension: DIM }),
        dir.path().join("vectors.bin"),
        CatalogOptions {
            embed_timeout: Duration::from_millis(50),
            ..test_options()
        },
    )
    .unwrap();

    let result = catalog.ingest(NoteCreate {
        content: "slow".to_string(),
        category: None,
    });
    assert!(matches!(result, Err(CatalogError::EmbeddingTimeout(_))));

    assert!(catalog.list().unwrap().is_empty());
    assert_eq!(catalog.indexed_count(), 0);
}

#[test]
fn test_reconcile_indexes_note_missing_from_index() {
    let dir = tempfile::tempdir().unwrap();

    // Simulate a crash after the record commit but before the vector
    // persist: the note exists, the index file does not.
    {
        let store = BackendCsv::load(&dir.path().join("notes.csv")).unwrap();
        store
            .create(NoteCreate {
                content: "hello".to_string(),
                category: None,
            })
            .unwrap();
    }

    let catalog = mock_catalog(dir.path());

    assert_eq!(catalog.indexed_count(), 1);
    let results = catalog.search("hello", 1).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "hello");
    assert!(results[0].distance < 1e-6);

    // A second pass finds nothing left to repair.
    let report = catalog.reconcile().unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.dropped, 0);
}

#[test]
fn test_reconcile_drops_dangling_vector() {
    let dir = tempfile::tempdir().unwrap();

    // A vector without a backing note.
    {
        let mut index = VectorIndex::new(DIM);
        index
            .insert(42, super::deterministic_vector("ghost", DIM))
            .unwrap();
        VectorStorage::new(dir.path().join("vectors.bin"))
            .save(&index, &model_id_hash("mock"))
            .unwrap();
    }

    let catalog = mock_catalog(dir.path());
    assert_eq!(catalog.indexed_count(), 0);
    assert!(catalog.search("ghost", 5).unwrap().is_empty());

    // The repaired index was persisted.
    drop(catalog);
    let loaded = VectorStorage::new(dir.path().join("vectors.bin"))
        .load(&model_id_hash("mock"), DIM)
        .unwrap();
    assert_eq!(loaded.len(), 0);
}

#[test]
fn test_search_skips_note_deleted_behind_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let store = BackendCsv::load(&dir.path().join("notes.csv")).unwrap();
    let catalog = NoteCatalog::open(
        Box::new(store.clone()),
        Arc::new(MockEmbedder::new(DIM)),
        dir.path().join("vectors.bin"),
        test_options(),
    )
    .unwrap();

    let kept = ingest(&catalog, "kept note").id;
    let doomed = ingest(&catalog, "doomed note").id;

    // Delete the record out from under the catalog; its vector is still in
    // the index, so the search will hit a dangling id.
    store.delete(doomed).unwrap();

    let results = catalog.search("kept note", 5).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, kept);
    assert_eq!(results[0].content, "kept note");
}

#[test]
fn test_reconcile_repairs_changes_made_behind_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let store = BackendCsv::load(&dir.path().join("notes.csv")).unwrap();
    let catalog = NoteCatalog::open(
        Box::new(store.clone()),
        Arc::new(MockEmbedder::new(DIM)),
        dir.path().join("vectors.bin"),
        test_options(),
    )
    .unwrap();

    ingest(&catalog, "anchor note");
    let doomed = ingest(&catalog, "doomed note").id;

    // Mutate the store behind the catalog: a new unindexed note first (so
    // its id is not a reuse of the deleted one), then a deletion that
    // leaves the doomed note's vector dangling.
    store
        .create(NoteCreate {
            content: "added later".to_string(),
            category: None,
        })
        .unwrap();
    store.delete(doomed).unwrap();

    let report = catalog.reconcile().unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(catalog.indexed_count(), 2);

    let results = catalog.search("added later", 1).unwrap();
    assert_eq!(results[0].content, "added later");
    assert!(results[0].distance < 1e-6);
}

#[test]
fn test_reopen_with_different_dimension_fails() {
    let dir = tempfile::tempdir().unwrap();

    {
        let catalog = mock_catalog(dir.path());
        ingest(&catalog, "note");
    }

    let result = open_catalog(dir.path(), Arc::new(MockEmbedder::new(DIM + 1)));
    assert!(matches!(
        result,
        Err(CatalogError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_reopen_with_different_model_fails() {
    struct OtherModel(MockEmbedder);

    impl Embedder for OtherModel {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            self.0.embed(text)
        }
        fn dimension(&self) -> usize {
            self.0.dimension()
        }
        fn model_id(&self) -> [u8; 32] {
            model_id_hash("other-model")
        }
    }

    let dir = tempfile::tempdir().unwrap();

    {
        let catalog = mock_catalog(dir.path());
        ingest(&catalog, "note");
    }

    let result = open_catalog(dir.path(), Arc::new(OtherModel(MockEmbedder::new(DIM))));
    assert!(matches!(result, Err(CatalogError::ModelMismatch)));
}

#[test]
fn test_dimension_override_validated_against_embedder() {
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(BackendCsv::load(&dir.path().join("notes.csv")).unwrap());

    let result = NoteCatalog::open(
        store,
        Arc::new(MockEmbedder::new(4)),
        dir.path().join("vectors.bin"),
        CatalogOptions {
            dimension: Some(3),
            ..test_options()
        },
    );

    assert!(matches!(
        result,
        Err(CatalogError::DimensionMismatch {
            expected: 3,
            got: 4
        })
    ));
}

#[test]
fn test_list_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = mock_catalog(dir.path());

    ingest(&catalog, "first");
    ingest(&catalog, "second");
    ingest(&catalog, "third");

    let ids: Vec<u64> = catalog.list().unwrap().iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[test]
fn test_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let catalog = mock_catalog(dir.path());
        ingest(&catalog, "persistent note");
    }

    let reopened = mock_catalog(dir.path());
    assert_eq!(reopened.indexed_count(), 1);

    let results = reopened.search("persistent note", 1).unwrap();
    assert_eq!(results[0].content, "persistent note");
    assert!(results[0].distance < 1e-6);
}

// Real-model tests require a download; run with --ignored.
#[test]
#[ignore = "requires model download"]
fn test_semantic_search_with_real_model() {
    use crate::semantic::FastembedEmbedder;

    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(
        FastembedEmbedder::new("all-MiniLM-L6-v2", dir.path().to_path_buf(), None).unwrap(),
    );
    let catalog = open_catalog(dir.path(), embedder).unwrap();

    let milk = ingest(&catalog, "buy milk").id;
    ingest(&catalog, "team meeting notes");
    let run = ingest(&catalog, "morning run").id;

    let results = catalog.search("grocery shopping", 1).unwrap();
    assert_eq!(results[0].id, milk);

    let results = catalog.search("jogging", 1).unwrap();
    assert_eq!(results[0].id, run);
}
