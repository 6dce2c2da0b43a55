//! Namespace naming and storage locations for independent collections.

use std::path::{Path, PathBuf};

/// Maps `(collection id, sub path)` pairs to canonical namespace strings and
/// on-disk store locations.
///
/// The mapping is pure and deterministic; the registry carries no state
/// beyond the root directory under which namespace stores live.
#[derive(Debug, Clone)]
pub struct NamespaceRegistry {
    root: PathBuf,
}

impl NamespaceRegistry {
    /// Builds a registry rooted at the given store directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Canonical namespace string for a collection subtree, e.g.
    /// `camp1_player_notes` for `("camp1", "player/notes")`.
    pub fn namespace(&self, collection_id: &str, sub_path: &str) -> String {
        let collection = sanitize_component(collection_id);
        // "." means the collection root, the same as an empty sub path.
        let sub = if sub_path == "." {
            String::new()
        } else {
            sanitize_component(sub_path)
        };
        if sub.is_empty() {
            collection
        } else {
            format!("{collection}_{sub}")
        }
    }

    /// Directory holding the artifacts of the given namespace.
    pub fn location(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    /// Root directory under which all namespaces live.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Replaces path separators and other filesystem-unsafe characters with `_`.
pub fn sanitize_component(input: &str) -> String {
    input
        .trim_matches(|ch: char| ch == '/' || ch == '\\' || ch.is_whitespace())
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
