//! Brute-force cosine-similarity search over a loaded embedding store.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::debug;

use crate::error::SearchError;
use crate::store::{ChunkMetadata, EmbeddingStore};

/// Metadata predicate applied before scoring.
///
/// The common case is access control: callers without GM access search with
/// `gm_content == Some(false)` so GM-only chunks never reach them.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Require `is_gm_content` to equal this value.
    pub gm_content: Option<bool>,
    /// Require the chunk's category to equal this value.
    pub category: Option<String>,
    /// Require the chunk's source file to equal this value.
    pub file: Option<String>,
}

impl SearchFilter {
    /// Filter that excludes GM-only content, for callers without GM access.
    pub fn player_visible() -> Self {
        Self {
            gm_content: Some(false),
            ..Self::default()
        }
    }

    fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(gm) = self.gm_content {
            if metadata.is_gm_content != gm {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if metadata.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(file) = &self.file {
            if metadata.file != *file {
                return false;
            }
        }
        true
    }
}

/// One scored search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// The stored chunk text.
    pub text: String,
    /// The chunk's metadata record.
    pub metadata: ChunkMetadata,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Similarity queries over one embedding store.
pub struct SimilarityIndex<'a> {
    store: &'a EmbeddingStore,
}

impl<'a> SimilarityIndex<'a> {
    /// Builds an index reading from the given store.
    pub fn new(store: &'a EmbeddingStore) -> Self {
        Self { store }
    }

    /// Returns up to `top_k` records passing `filter`, ordered by descending
    /// cosine similarity against `query`.
    ///
    /// Ties keep insertion order, so results are deterministic. A namespace
    /// that was never ingested surfaces as `StoreError::NotFound`, which
    /// callers must treat as "no index available" rather than zero matches.
    /// `top_k == 0` yields an empty result.
    pub fn search(
        &self,
        namespace: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let snapshot = self.store.load(namespace)?;

        let mut scored: Vec<(usize, f32)> = Vec::new();
        for (idx, vector) in snapshot.vectors.iter().enumerate() {
            if vector.len() != query.len() {
                return Err(SearchError::DimensionMismatch {
                    query: query.len(),
                    stored: vector.len(),
                });
            }
            if let Some(filter) = filter {
                if !filter.matches(&snapshot.metadata[idx]) {
                    continue;
                }
            }
            scored.push((idx, cosine_similarity(query, vector)));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        debug!(
            namespace,
            candidates = snapshot.len(),
            returned = scored.len(),
            "similarity search complete"
        );

        Ok(scored
            .into_iter()
            .map(|(idx, score)| SearchHit {
                text: snapshot.texts[idx].clone(),
                metadata: snapshot.metadata[idx].clone(),
                score,
            })
            .collect())
    }
}

/// Cosine similarity between two equal-length vectors.
///
/// A zero-magnitude vector on either side scores 0.0 rather than NaN so a
/// degenerate record can never poison the ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a.sqrt() * mag_b.sqrt())
}
