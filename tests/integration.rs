//! End-to-end ingestion and search scenarios over a temporary store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use lorestore::{
    chunk, Document, EmbedError, Embedder, EmbeddingStore, IngestOptions, Indexer,
    NamespaceRegistry, SearchError, SearchFilter, SimilarityIndex, StoreError,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const DIMS: usize = 8;
const OUTAGE_MARKER: &str = "%%outage%%";

/// Deterministic in-process embedder. Identical text always maps to an
/// identical vector, so a query for stored text scores 1.0. Any input
/// containing [`OUTAGE_MARKER`] fails the batch, simulating a provider error.
struct FakeEmbedder;

impl Embedder for FakeEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        inputs
            .iter()
            .map(|text| {
                if text.contains(OUTAGE_MARKER) {
                    return Err(EmbedError::new("simulated embedding outage"));
                }
                Ok(embed_text(text))
            })
            .collect()
    }
}

fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMS];
    let mut state = 0xcbf29ce484222325u64;
    for byte in text.bytes() {
        state ^= u64::from(byte);
        state = state.wrapping_mul(0x100000001b3);
        let slot = (state % DIMS as u64) as usize;
        vector[slot] += ((state >> 32) % 1000) as f32 / 1000.0 + 0.001;
    }
    vector
}

/// Embeds like [`FakeEmbedder`] but records the size of every batch it sees.
struct CountingEmbedder {
    batch_sizes: Mutex<Vec<usize>>,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            batch_sizes: Mutex::new(Vec::new()),
        }
    }
}

impl Embedder for CountingEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.batch_sizes.lock().unwrap().push(inputs.len());
        Ok(inputs.iter().map(|text| embed_text(text)).collect())
    }
}

/// Embeds normally but raises the cancellation flag as a side effect, so the
/// request lands mid-pass rather than before the first document.
struct CancellingEmbedder<'a> {
    cancel: &'a AtomicBool,
}

impl Embedder for CancellingEmbedder<'_> {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.cancel.store(true, Ordering::Release);
        Ok(inputs.iter().map(|text| embed_text(text)).collect())
    }
}

fn doc(id: &str, text: &str, gm: bool) -> Document {
    Document::new(id, text, SystemTime::now(), gm)
}

fn options(chunk_size: usize) -> IngestOptions {
    IngestOptions {
        chunk_size,
        ..Default::default()
    }
}

#[test]
fn hello_world_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let registry = NamespaceRegistry::new(dir.path());
    let namespace = registry.namespace("camp1", "notes");
    assert_eq!(namespace, "camp1_notes");

    let indexer = Indexer::new(&store, &FakeEmbedder);
    let report = indexer
        .ingest(
            &namespace,
            &[doc("notes/hello.md", "hello world", false)],
            &options(100),
            None,
        )
        .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.total_chunks, 1);
    assert!(!report.cancelled);

    let index = SimilarityIndex::new(&store);
    let hits = index
        .search(&namespace, &embed_text("hello world"), 5, None)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "hello world");
    assert_eq!(hits[0].metadata.file, "notes/hello.md");
    assert_eq!(hits[0].metadata.chunk_index, 0);
    assert_eq!(hits[0].metadata.total_chunks, 1);
    assert!(hits[0].score > 0.999, "self-match scored {}", hits[0].score);
}

#[test]
fn gm_content_is_hidden_from_players() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_lore";
    let secret = "The lich's phylactery is hidden beneath the old mill.";
    let public = "The town of Bree welcomes travelers from all roads.";

    let indexer = Indexer::new(&store, &FakeEmbedder);
    indexer
        .ingest(
            namespace,
            &[
                doc("gm/lore/secrets.md", secret, true),
                doc("player/lore/town.md", public, false),
            ],
            &options(512),
            None,
        )
        .unwrap();

    let index = SimilarityIndex::new(&store);
    let query = embed_text(secret);

    // A player query never surfaces GM chunks, even on an exact match.
    let player_filter = SearchFilter::player_visible();
    let player_hits = index
        .search(namespace, &query, 10, Some(&player_filter))
        .unwrap();
    assert_eq!(player_hits.len(), 1);
    assert_eq!(player_hits[0].text, public);
    assert!(!player_hits[0].metadata.is_gm_content);

    // Without the filter the GM chunk wins outright.
    let gm_hits = index.search(namespace, &query, 10, None).unwrap();
    assert_eq!(gm_hits[0].text, secret);
    assert!(gm_hits[0].score > 0.999);
}

#[test]
fn top_k_bounds_the_result_count() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";

    let documents: Vec<Document> = (0..6)
        .map(|n| doc(&format!("notes/{n}.txt"), &format!("note number {n}"), false))
        .collect();
    Indexer::new(&store, &FakeEmbedder)
        .ingest(namespace, &documents, &options(512), None)
        .unwrap();

    let index = SimilarityIndex::new(&store);
    let query = embed_text("note number 3");
    assert_eq!(index.search(namespace, &query, 2, None).unwrap().len(), 2);
    assert!(index.search(namespace, &query, 0, None).unwrap().is_empty());

    // Asking for more than exists returns everything, best first.
    let all = index.search(namespace, &query, 100, None).unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(all[0].text, "note number 3");
}

#[test]
fn score_ties_keep_insertion_order() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";
    let body = "the same warning is posted at both gates";

    // Identical text embeds to identical vectors, so both records tie at 1.0.
    Indexer::new(&store, &FakeEmbedder)
        .ingest(
            namespace,
            &[
                doc("notes/first.md", body, false),
                doc("notes/second.md", body, false),
            ],
            &options(512),
            None,
        )
        .unwrap();

    let hits = SimilarityIndex::new(&store)
        .search(namespace, &embed_text(body), 10, None)
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].score, hits[1].score);
    assert_eq!(hits[0].metadata.file, "notes/first.md");
    assert_eq!(hits[1].metadata.file, "notes/second.md");
}

#[test]
fn embedding_batches_stay_within_the_bound() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_lore";
    // 700 code points at chunk size 10 make 70 chunks, spilling over two full
    // batches of the default size 32.
    let text = "a".repeat(700);

    let embedder = CountingEmbedder::new();
    let report = Indexer::new(&store, &embedder)
        .ingest(
            namespace,
            &[doc("lore/long.md", &text, false)],
            &IngestOptions {
                chunk_size: 10,
                ..IngestOptions::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(report.total_chunks, 70);

    let sizes = embedder.batch_sizes.lock().unwrap().clone();
    assert_eq!(sizes, vec![32, 32, 6]);
}

#[test]
fn fresh_store_skips_reingestion() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";
    let past = SystemTime::now() - Duration::from_secs(3600);
    let documents = vec![
        Document::new("notes/a.md", "alpha content", past, false),
        Document::new("notes/b.md", "beta content", past, false),
    ];

    let indexer = Indexer::new(&store, &FakeEmbedder);
    let first = indexer
        .ingest(namespace, &documents, &options(512), None)
        .unwrap();
    assert_eq!(first.processed, 2);
    let saved = store.load(namespace).unwrap();

    // Every document is older than the stored vectors, so nothing runs.
    let second = indexer
        .ingest(namespace, &documents, &options(512), None)
        .unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(store.load(namespace).unwrap(), saved);

    // Force overrides freshness.
    let forced = indexer
        .ingest(
            namespace,
            &documents,
            &IngestOptions {
                force: true,
                ..options(512)
            },
            None,
        )
        .unwrap();
    assert_eq!(forced.processed, 2);
    assert_eq!(forced.skipped, 0);
}

#[test]
fn one_stale_document_reembeds_the_namespace() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";
    let past = SystemTime::now() - Duration::from_secs(3600);
    let future = SystemTime::now() + Duration::from_secs(3600);

    let indexer = Indexer::new(&store, &FakeEmbedder);
    indexer
        .ingest(
            namespace,
            &[
                Document::new("notes/a.md", "alpha content", past, false),
                Document::new("notes/b.md", "beta content", past, false),
            ],
            &options(512),
            None,
        )
        .unwrap();

    // One stale document forces the whole namespace through again; a partial
    // pass would drop the fresh document from the overwritten store.
    let report = indexer
        .ingest(
            namespace,
            &[
                Document::new("notes/a.md", "alpha content revised", future, false),
                Document::new("notes/b.md", "beta content", past, false),
            ],
            &options(512),
            None,
        )
        .unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 0);

    let snapshot = store.load(namespace).unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.texts.contains(&"alpha content revised".to_string()));
    assert!(snapshot.texts.contains(&"beta content".to_string()));
}

#[test]
fn cancellation_stops_the_pass_without_saving() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";
    let cancel = AtomicBool::new(true);

    let report = Indexer::new(&store, &FakeEmbedder)
        .ingest(
            namespace,
            &[doc("notes/a.md", "alpha content", false)],
            &options(512),
            Some(&cancel),
        )
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.processed, 0);
    assert!(!store.exists(namespace));
    assert!(cancel.load(Ordering::Acquire));
}

#[test]
fn mid_pass_cancellation_never_saves_partial_data() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";
    let cancel = AtomicBool::new(false);
    let embedder = CancellingEmbedder { cancel: &cancel };

    // The flag goes up while the first document embeds, so the pass has real
    // work in flight when it stops before the second document.
    let report = Indexer::new(&store, &embedder)
        .ingest(
            namespace,
            &[
                doc("notes/a.md", "alpha content", false),
                doc("notes/b.md", "beta content", false),
            ],
            &options(512),
            Some(&cancel),
        )
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.processed, 1);
    assert!(!store.exists(namespace));
}

#[test]
fn missing_namespace_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let index = SimilarityIndex::new(&store);

    let err = index
        .search("camp1_never_ingested", &embed_text("anything"), 5, None)
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Store(StoreError::NotFound { .. })
    ));
}

#[test]
fn query_dimension_mismatch_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";
    Indexer::new(&store, &FakeEmbedder)
        .ingest(
            namespace,
            &[doc("notes/a.md", "alpha content", false)],
            &options(512),
            None,
        )
        .unwrap();

    let wrong = vec![1.0f32; DIMS + 1];
    let err = SimilarityIndex::new(&store)
        .search(namespace, &wrong, 5, None)
        .unwrap_err();
    assert!(matches!(err, SearchError::DimensionMismatch { .. }));
}

#[test]
fn embedding_failure_drops_only_that_document() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";
    let poisoned = format!("this document will not embed {OUTAGE_MARKER}");

    let report = Indexer::new(&store, &FakeEmbedder)
        .ingest(
            namespace,
            &[
                doc("notes/good1.md", "first healthy document", false),
                doc("notes/bad.md", &poisoned, false),
                doc("notes/good2.md", "second healthy document", false),
            ],
            &options(512),
            None,
        )
        .unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);

    let snapshot = store.load(namespace).unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.texts.iter().all(|text| !text.contains(OUTAGE_MARKER)));
}

#[test]
fn blank_documents_are_counted_not_stored() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_notes";

    let report = Indexer::new(&store, &FakeEmbedder)
        .ingest(
            namespace,
            &[
                doc("notes/blank.md", "   \n\t  ", false),
                doc("notes/real.md", "actual content", false),
            ],
            &options(512),
            None,
        )
        .unwrap();
    assert_eq!(report.skipped_empty, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(store.load(namespace).unwrap().len(), 1);
}

#[test]
fn long_documents_chunk_with_full_coverage() {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::new(dir.path());
    let namespace = "camp1_lore";
    let text = "The ancient kingdom of Velmora fell in a single night. ".repeat(20);
    let expected_chunks = chunk(&text, 50);
    assert!(expected_chunks.len() > 1);

    let report = Indexer::new(&store, &FakeEmbedder)
        .ingest(
            namespace,
            &[doc("lore/velmora.md", &text, false)],
            &options(50),
            None,
        )
        .unwrap();
    assert_eq!(report.total_chunks, expected_chunks.len());

    // Stored texts are in chunk order and concatenate back to the original.
    let snapshot = store.load(namespace).unwrap();
    let rebuilt: String = snapshot.texts.concat();
    assert_eq!(rebuilt, text);
    for (idx, metadata) in snapshot.metadata.iter().enumerate() {
        assert_eq!(metadata.chunk_index, idx);
        assert_eq!(metadata.total_chunks, expected_chunks.len());
        assert_eq!(metadata.chunk_size, 50);
    }
}
