//! Embedding generation seam.
//!
//! The embedding generator is an external collaborator: the core only needs
//! "texts in, one fixed-length vector per text out". Implementations must
//! return vectors in input order with a constant dimensionality.

pub mod openai;

pub use openai::OpenAiEmbedder;

use crate::error::EmbedError;

/// Batch embedding interface supplied by an external embedding generator.
pub trait Embedder {
    /// Maximum inputs a single [`embed_batch`](Self::embed_batch) call accepts.
    fn batch_size(&self) -> usize {
        32
    }

    /// Embeds a batch of texts, returning one vector per input in order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;
}
