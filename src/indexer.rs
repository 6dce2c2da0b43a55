//! Incremental ingestion: chunk, embed, and persist documents per namespace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunker;
use crate::embedder::Embedder;
use crate::error::StoreError;
use crate::store::{ChunkMetadata, EmbeddingStore};

/// One source document queued for ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    /// Document identity (relative file path or note id).
    pub source_id: String,
    /// Raw document text.
    pub text: String,
    /// When the document was last modified at its source.
    pub mtime: SystemTime,
    /// Whether the document is visible to the GM only.
    pub is_gm_content: bool,
    /// Optional content category.
    pub category: Option<String>,
    /// Optional caller-supplied tags.
    pub tags: Vec<String>,
}

impl Document {
    /// Builds a document with the required fields and no category or tags.
    pub fn new(
        source_id: impl Into<String>,
        text: impl Into<String>,
        mtime: SystemTime,
        is_gm_content: bool,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
            mtime,
            is_gm_content,
            category: None,
            tags: Vec::new(),
        }
    }
}

/// Tunables for one ingestion pass.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Chunk length in code points.
    pub chunk_size: usize,
    /// Upper bound on texts per embedding request.
    pub batch_size: usize,
    /// Re-embed every document regardless of freshness.
    pub force: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            batch_size: 32,
            force: false,
        }
    }
}

/// Outcome counters for one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents chunked, embedded, and included in the saved store.
    pub processed: usize,
    /// Documents skipped because the store was already fresh.
    pub skipped: usize,
    /// Documents skipped because they contained no embeddable text.
    pub skipped_empty: usize,
    /// Documents dropped because embedding them failed.
    pub failed: usize,
    /// Total chunks written to the store.
    pub total_chunks: usize,
    /// True when the pass stopped early on a cancellation request.
    pub cancelled: bool,
}

/// Drives chunk → embed → store for batches of documents.
pub struct Indexer<'a, E: Embedder + ?Sized> {
    store: &'a EmbeddingStore,
    embedder: &'a E,
}

impl<'a, E: Embedder + ?Sized> Indexer<'a, E> {
    /// Builds an indexer writing to `store` through `embedder`.
    pub fn new(store: &'a EmbeddingStore, embedder: &'a E) -> Self {
        Self { store, embedder }
    }

    /// Ingests `documents` into `namespace`, replacing the namespace's store
    /// in full.
    ///
    /// When the store is newer than every document and `force` is off, the
    /// whole pass is skipped and the store is left untouched. Because a save
    /// overwrites the namespace, a pass that runs at all re-embeds every
    /// document, not just the stale ones; otherwise the fresh documents'
    /// chunks would be dropped from the overwritten store.
    ///
    /// A document whose embedding fails is counted as `failed` and the pass
    /// continues. Cancellation is honored between documents; a cancelled
    /// pass never saves partial data.
    pub fn ingest(
        &self,
        namespace: &str,
        documents: &[Document],
        options: &IngestOptions,
        cancel: Option<&AtomicBool>,
    ) -> Result<IngestReport, StoreError> {
        let mut report = IngestReport::default();
        if documents.is_empty() {
            return Ok(report);
        }

        if !options.force {
            if let Ok(store_mtime) = self.store.last_modified(namespace) {
                let all_fresh = documents.iter().all(|doc| store_mtime > doc.mtime);
                if all_fresh {
                    report.skipped = documents.len();
                    debug!(
                        namespace,
                        documents = documents.len(),
                        "store is fresh, skipping ingestion pass"
                    );
                    return Ok(report);
                }
            }
        }

        let chunk_size = options.chunk_size.max(1);
        let batch_size = options.batch_size.max(1);
        let created_at_epoch_ms = epoch_ms();

        let mut vectors: Vec<Vec<f32>> = Vec::new();
        let mut metadata: Vec<ChunkMetadata> = Vec::new();
        let mut texts: Vec<String> = Vec::new();

        for document in documents {
            if cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                report.cancelled = true;
                info!(namespace, "ingestion pass cancelled between documents");
                break;
            }

            let chunks = chunker::chunk(&document.text, chunk_size);
            if chunks.is_empty() {
                report.skipped_empty += 1;
                debug!(namespace, source = %document.source_id, "skipping empty document");
                continue;
            }

            let doc_vectors = match self.embed_document(&chunks, batch_size) {
                Ok(vectors) => vectors,
                Err(err) => {
                    warn!(
                        namespace,
                        source = %document.source_id,
                        error = %err,
                        "embedding failed, dropping document from this pass"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let total_chunks = chunks.len();
            for (chunk, vector) in chunks.into_iter().zip(doc_vectors) {
                metadata.push(ChunkMetadata {
                    file: document.source_id.clone(),
                    is_gm_content: document.is_gm_content,
                    chunk_size,
                    chunk_index: chunk.sequence,
                    total_chunks,
                    category: document.category.clone(),
                    tags: document.tags.clone(),
                    created_at_epoch_ms,
                    extra: Default::default(),
                });
                texts.push(chunk.text);
                vectors.push(vector);
            }
            report.processed += 1;
            report.total_chunks += total_chunks;
        }

        if report.cancelled {
            return Ok(report);
        }
        if report.total_chunks == 0 {
            debug!(namespace, "no chunks produced, leaving existing store untouched");
            return Ok(report);
        }

        self.store.save(namespace, vectors, metadata, texts)?;
        info!(
            namespace,
            processed = report.processed,
            skipped_empty = report.skipped_empty,
            failed = report.failed,
            chunks = report.total_chunks,
            "ingestion pass complete"
        );
        Ok(report)
    }

    /// Embeds one document's chunks in bounded batches. Batching stays within
    /// a document so an embedding failure aborts exactly that document.
    fn embed_document(
        &self,
        chunks: &[chunker::Chunk],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, crate::error::EmbedError> {
        let batch_size = batch_size.min(self.embedder.batch_size()).max(1);
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let inputs: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
            let embedded = self.embedder.embed_batch(&inputs)?;
            if embedded.len() != inputs.len() {
                return Err(crate::error::EmbedError::new(format!(
                    "embedder returned {} vectors for {} inputs",
                    embedded.len(),
                    inputs.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
