//! Directory-backed persistence for embedding vectors, metadata, and texts.
//!
//! Each namespace owns one directory containing three positionally aligned
//! JSON artifacts: `vectors.json`, `metadata.json`, and `texts.json`. A save
//! replaces the whole directory: the new artifacts are written to a sibling
//! temp directory first and swapped into place afterwards, so readers see the
//! old store in full or the new store in full, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;

const VECTORS_FILE: &str = "vectors.json";
const METADATA_FILE: &str = "metadata.json";
const TEXTS_FILE: &str = "texts.json";

/// Metadata attached to every stored chunk.
///
/// The fixed fields are required; anything else a producer supplies is kept
/// verbatim in `extra` so older and newer artifacts stay loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source document identity (relative file path or note id).
    pub file: String,
    /// Whether this chunk is visible to the GM only.
    pub is_gm_content: bool,
    /// Chunk size (code points) the document was split with.
    pub chunk_size: usize,
    /// 0-based position of the chunk within its source document.
    #[serde(default)]
    pub chunk_index: usize,
    /// Number of chunks the source document produced.
    #[serde(default)]
    pub total_chunks: usize,
    /// Optional content category supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Optional caller-supplied tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Epoch milliseconds when the chunk was embedded.
    #[serde(default)]
    pub created_at_epoch_ms: u64,
    /// Open map of additional fields preserved across load/save.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A fully loaded namespace: three positionally correlated sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    /// One embedding vector per chunk.
    pub vectors: Vec<Vec<f32>>,
    /// One metadata record per chunk, aligned with `vectors`.
    pub metadata: Vec<ChunkMetadata>,
    /// The exact chunk text each vector was computed from.
    pub texts: Vec<String>,
}

impl StoreSnapshot {
    /// Number of records in the snapshot.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// True when the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// The on-disk embedding store, holding any number of namespaces under one
/// root directory.
///
/// Constructed explicitly and passed to collaborators; there is no process
/// global. Same-namespace operations are serialized through an in-process
/// lock map so concurrent ingestion and query against one namespace never
/// interleave.
pub struct EmbeddingStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmbeddingStore {
    /// Opens (or lazily creates) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Persists the three aligned sequences for `namespace`, replacing any
    /// previous contents of the namespace in full.
    ///
    /// Length mismatches are rejected before anything touches the disk. The
    /// artifacts are written into a `<namespace>.tmp` sibling and swapped in
    /// at the end, so a failure at any earlier point leaves the previous
    /// store untouched.
    pub fn save(
        &self,
        namespace: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    ) -> Result<(), StoreError> {
        if vectors.len() != metadata.len() || vectors.len() != texts.len() {
            return Err(StoreError::Write {
                detail: format!(
                    "mismatched lengths for namespace {namespace:?}: {} vectors, {} metadata, {} texts",
                    vectors.len(),
                    metadata.len(),
                    texts.len()
                ),
            });
        }

        let lock = self.lock_for(namespace);
        let _guard = hold(&lock);
        self.recover(namespace);

        let final_dir = self.root.join(namespace);
        let tmp_dir = self.root.join(format!("{namespace}.tmp"));
        let old_dir = self.root.join(format!("{namespace}.old"));

        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)
                .map_err(|err| StoreError::io(format!("failed to clear stale {tmp_dir:?}"), err))?;
        }
        fs::create_dir_all(&tmp_dir)
            .map_err(|err| StoreError::io(format!("failed to create {tmp_dir:?}"), err))?;

        let record_count = vectors.len();
        write_json(&tmp_dir.join(VECTORS_FILE), &vectors)?;
        write_json(&tmp_dir.join(METADATA_FILE), &metadata)?;
        write_json(&tmp_dir.join(TEXTS_FILE), &texts)?;

        // Swap the new generation into place. The previous store stays on
        // disk until the new directory holds the live name.
        if old_dir.exists() {
            fs::remove_dir_all(&old_dir)
                .map_err(|err| StoreError::io(format!("failed to clear stale {old_dir:?}"), err))?;
        }
        if final_dir.exists() {
            fs::rename(&final_dir, &old_dir).map_err(|err| {
                StoreError::io(format!("failed to stage previous store {final_dir:?}"), err)
            })?;
        }
        fs::rename(&tmp_dir, &final_dir)
            .map_err(|err| StoreError::io(format!("failed to publish {final_dir:?}"), err))?;
        if old_dir.exists() {
            if let Err(err) = fs::remove_dir_all(&old_dir) {
                warn!(namespace, error = %err, "failed to remove superseded store generation");
            }
        }

        info!(namespace, records = record_count, "saved embedding store");
        Ok(())
    }

    /// Loads the three aligned sequences for `namespace`.
    pub fn load(&self, namespace: &str) -> Result<StoreSnapshot, StoreError> {
        let lock = self.lock_for(namespace);
        let _guard = hold(&lock);
        self.recover(namespace);

        let dir = self.root.join(namespace);
        if !self.artifacts_present(namespace) {
            return Err(StoreError::NotFound {
                namespace: namespace.to_string(),
            });
        }

        let vectors: Vec<Vec<f32>> = read_json(namespace, &dir.join(VECTORS_FILE))?;
        let metadata: Vec<ChunkMetadata> = read_json(namespace, &dir.join(METADATA_FILE))?;
        let texts: Vec<String> = read_json(namespace, &dir.join(TEXTS_FILE))?;

        if vectors.len() != metadata.len() || vectors.len() != texts.len() {
            return Err(StoreError::corrupt(
                namespace,
                format!(
                    "artifact lengths disagree: {} vectors, {} metadata, {} texts",
                    vectors.len(),
                    metadata.len(),
                    texts.len()
                ),
            ));
        }

        debug!(namespace, records = vectors.len(), "loaded embedding store");
        Ok(StoreSnapshot {
            vectors,
            metadata,
            texts,
        })
    }

    /// True when the namespace has a complete saved store.
    pub fn exists(&self, namespace: &str) -> bool {
        let lock = self.lock_for(namespace);
        let _guard = hold(&lock);
        self.recover(namespace);
        self.artifacts_present(namespace)
    }

    /// Modification time of the namespace's store, used for freshness checks.
    pub fn last_modified(&self, namespace: &str) -> Result<SystemTime, StoreError> {
        let lock = self.lock_for(namespace);
        let _guard = hold(&lock);
        self.recover(namespace);

        if !self.artifacts_present(namespace) {
            return Err(StoreError::NotFound {
                namespace: namespace.to_string(),
            });
        }
        let path = self.root.join(namespace).join(VECTORS_FILE);
        let meta = fs::metadata(&path)
            .map_err(|err| StoreError::io(format!("failed to stat {path:?}"), err))?;
        meta.modified()
            .map_err(|err| StoreError::io(format!("failed to read mtime of {path:?}"), err))
    }

    /// Deletes the namespace's store. Clearing a namespace that was never
    /// saved is a no-op.
    pub fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(namespace);
        let _guard = hold(&lock);

        for suffix in ["", ".tmp", ".old"] {
            let dir = self.root.join(format!("{namespace}{suffix}"));
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .map_err(|err| StoreError::io(format!("failed to remove {dir:?}"), err))?;
            }
        }
        info!(namespace, "cleared embedding store");
        Ok(())
    }

    /// Lists the namespaces with a saved store, sorted by name.
    pub fn namespaces(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => {
                return Err(StoreError::io(
                    format!("failed to list store root {:?}", self.root),
                    err,
                ))
            }
        };
        for entry in entries {
            let entry = entry
                .map_err(|err| StoreError::io("failed to read store root entry".to_string(), err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") || name.ends_with(".old") {
                continue;
            }
            if entry.path().is_dir() && self.artifacts_present(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn artifacts_present(&self, namespace: &str) -> bool {
        let dir = self.root.join(namespace);
        [VECTORS_FILE, METADATA_FILE, TEXTS_FILE]
            .iter()
            .all(|file| dir.join(file).is_file())
    }

    /// Repairs the one crash window the swap leaves behind: the live
    /// directory already renamed aside but the new generation not yet
    /// published. The `.old` generation is complete, so restore it.
    fn recover(&self, namespace: &str) {
        let final_dir = self.root.join(namespace);
        let old_dir = self.root.join(format!("{namespace}.old"));
        if !final_dir.exists() && old_dir.exists() {
            match fs::rename(&old_dir, &final_dir) {
                Ok(()) => info!(namespace, "restored previous store generation"),
                Err(err) => warn!(namespace, error = %err, "failed to restore previous store generation"),
            }
        }
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<(), StoreError> {
    let file =
        File::create(path).map_err(|err| StoreError::io(format!("failed to create {path:?}"), err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|err| {
        StoreError::io(
            format!("failed to serialize {path:?}"),
            std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        )
    })?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(namespace: &str, path: &PathBuf) -> Result<T, StoreError> {
    let file =
        File::open(path).map_err(|err| StoreError::io(format!("failed to open {path:?}"), err))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|err| StoreError::corrupt(namespace, format!("malformed {path:?}: {err}")))
}
