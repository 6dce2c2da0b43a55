//! Deterministic text chunking for embedding input.

use serde::Serialize;

/// A bounded slice of a source document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// 0-based position of this chunk within the source document.
    pub sequence: usize,
    /// Chunk body submitted to the embedding generator.
    pub text: String,
    /// Length of the chunk text in bytes.
    pub byte_len: usize,
}

/// Splits `text` into consecutive chunks of at most `chunk_size` code points.
///
/// The final chunk may be shorter. Splitting happens on Unicode code-point
/// boundaries, never raw bytes, so multi-byte characters are never cut.
/// Empty or whitespace-only input yields zero chunks; callers treat that as a
/// defined no-op rather than an error. The output is a pure function of
/// `(text, chunk_size)`, which keeps re-indexing idempotent.
pub fn chunk(text: &str, chunk_size: usize) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            push_chunk(&mut chunks, std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        push_chunk(&mut chunks, current);
    }
    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: String) {
    let byte_len = text.len();
    chunks.push(Chunk {
        sequence: chunks.len(),
        text,
        byte_len,
    });
}
