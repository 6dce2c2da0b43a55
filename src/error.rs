//! Error taxonomy shared across the store, indexer, and search components.

use std::fmt;
use std::io;

/// Errors surfaced by the on-disk embedding store.
#[derive(Debug)]
pub enum StoreError {
    /// The namespace has never been saved.
    NotFound {
        /// Namespace that was requested.
        namespace: String,
    },
    /// On-disk artifacts are inconsistent or unparseable; fatal for this
    /// namespace only.
    Corrupt {
        /// Namespace whose artifacts failed validation.
        namespace: String,
        /// Human-readable description of the inconsistency.
        detail: String,
    },
    /// Pre-write validation rejected the save; nothing was written.
    Write {
        /// Description of the rejected input.
        detail: String,
    },
    /// Underlying filesystem failure.
    Io {
        /// What the store was doing when the failure occurred.
        context: String,
        /// The originating I/O error.
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn corrupt(namespace: &str, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            namespace: namespace.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { namespace } => {
                write!(f, "no embedding store exists for namespace {namespace:?}")
            }
            Self::Corrupt { namespace, detail } => {
                write!(f, "embedding store for {namespace:?} is corrupt: {detail}")
            }
            Self::Write { detail } => write!(f, "refusing to write embedding store: {detail}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors surfaced by similarity queries.
#[derive(Debug)]
pub enum SearchError {
    /// The underlying store could not be read.
    Store(StoreError),
    /// The query vector length differs from the stored vector length.
    DimensionMismatch {
        /// Dimensionality of the caller's query vector.
        query: usize,
        /// Dimensionality of the stored vectors.
        stored: usize,
    },
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => err.fmt(f),
            Self::DimensionMismatch { query, stored } => write!(
                f,
                "query vector has {query} dimensions but the store holds {stored}-dimensional vectors"
            ),
        }
    }
}

impl std::error::Error for SearchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::DimensionMismatch { .. } => None,
        }
    }
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Failure reported by an external embedding generator.
///
/// During ingestion these are recovered per document: the failing document is
/// counted in the report and the pass continues.
#[derive(Debug)]
pub struct EmbedError {
    message: String,
}

impl EmbedError {
    /// Wraps a provider-specific failure description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "embedding generation failed: {}", self.message)
    }
}

impl std::error::Error for EmbedError {}
