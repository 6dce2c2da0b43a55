#![warn(missing_docs)]
//! Core library entry points for the lorestore semantic memory store.

pub mod chunker;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod namespace;
pub mod npy;
pub mod search;
pub mod store;

pub use chunker::{chunk, Chunk};
pub use embedder::{Embedder, OpenAiEmbedder};
pub use error::{EmbedError, SearchError, StoreError};
pub use indexer::{Document, IngestOptions, IngestReport, Indexer};
pub use namespace::NamespaceRegistry;
pub use search::{cosine_similarity, SearchFilter, SearchHit, SimilarityIndex};
pub use store::{ChunkMetadata, EmbeddingStore, StoreSnapshot};
