//! Embedding gallery — immutable snapshot of enrolled identities.
//!
//! The gallery file is a JSON container of two index-aligned lists: identity
//! ids and embedding vectors (index i in both lists refers to the same
//! identity). A snapshot is built once at load and never mutated; reloads
//! build a complete new snapshot off to the side and publish it through
//! [`GalleryHandle`] as a unit, so a concurrent matcher call always sees
//! either the old or the new gallery, never a mix.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed gallery file: {0}")]
    Malformed(String),
    #[error("identity id list and embedding list have different lengths ({ids} vs {embeddings})")]
    LengthMismatch { ids: usize, embeddings: usize },
    #[error("duplicate identity id in gallery: {0}")]
    DuplicateId(String),
    #[error("embedding for {identity_id} has dimension {got}, expected {expected}")]
    InconsistentDimension {
        identity_id: String,
        expected: usize,
        got: usize,
    },
}

/// One enrolled identity and its embedding.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub embedding: Embedding,
}

/// On-disk gallery format: index-aligned id and vector lists.
#[derive(Serialize, Deserialize)]
struct GalleryFile {
    identity_ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

/// Immutable gallery snapshot.
#[derive(Debug)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    dim: usize,
}

impl Gallery {
    /// Build a gallery from entries, validating id uniqueness and uniform
    /// dimensionality. An empty entry list is valid — matching against it
    /// fails with `EmptyGallery` at call time, not at load.
    pub fn new(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let dim = entries.first().map(|e| e.embedding.dim()).unwrap_or(0);

        let mut seen = std::collections::HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.identity_id.as_str()) {
                return Err(GalleryError::DuplicateId(entry.identity_id.clone()));
            }
            if entry.embedding.dim() != dim {
                return Err(GalleryError::InconsistentDimension {
                    identity_id: entry.identity_id.clone(),
                    expected: dim,
                    got: entry.embedding.dim(),
                });
            }
        }

        Ok(Self { entries, dim })
    }

    /// Load a gallery snapshot from a serialized file.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let bytes = std::fs::read(path).map_err(|source| GalleryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GalleryError> {
        let file: GalleryFile = serde_json::from_slice(bytes)
            .map_err(|e| GalleryError::Malformed(e.to_string()))?;

        if file.identity_ids.len() != file.embeddings.len() {
            return Err(GalleryError::LengthMismatch {
                ids: file.identity_ids.len(),
                embeddings: file.embeddings.len(),
            });
        }

        let entries = file
            .identity_ids
            .into_iter()
            .zip(file.embeddings)
            .map(|(identity_id, values)| GalleryEntry {
                identity_id,
                embedding: Embedding::new(values),
            })
            .collect();

        Self::new(entries)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimensionality of this snapshot (0 when empty).
    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// Shared, versioned handle to the current gallery snapshot.
///
/// The only state shared across concurrent verification attempts. Readers
/// take an `Arc` to the snapshot and keep using it for the whole attempt
/// even if a reload publishes a newer one mid-flight.
pub struct GalleryHandle {
    inner: RwLock<(Arc<Gallery>, u64)>,
}

impl GalleryHandle {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            inner: RwLock::new((Arc::new(gallery), 1)),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<Gallery> {
        self.inner.read().expect("gallery lock poisoned").0.clone()
    }

    /// Monotonic snapshot version, bumped on every successful reload.
    pub fn version(&self) -> u64 {
        self.inner.read().expect("gallery lock poisoned").1
    }

    /// Reload from the gallery file and swap the snapshot atomically.
    ///
    /// The new gallery is fully built and validated before the swap; on any
    /// error the previous snapshot stays published untouched.
    pub fn reload(&self, path: &Path) -> Result<(u64, usize), GalleryError> {
        let fresh = Gallery::load(path)?;
        let entries = fresh.len();
        let mut guard = self.inner.write().expect("gallery lock poisoned");
        guard.0 = Arc::new(fresh);
        guard.1 += 1;
        let version = guard.1;
        drop(guard);
        tracing::info!(version, entries, "gallery snapshot swapped");
        Ok((version, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            identity_id: id.to_string(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let json = r#"{"identity_ids":["321654","852741"],"embeddings":[[1.0,0.0],[0.0,1.0]]}"#;
        let gallery = Gallery::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.dim(), 2);
        assert_eq!(gallery.entries()[0].identity_id, "321654");
        assert_eq!(gallery.entries()[1].embedding.values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_from_bytes_malformed() {
        let result = Gallery::from_bytes(b"not json");
        assert!(matches!(result, Err(GalleryError::Malformed(_))));
    }

    #[test]
    fn test_length_mismatch() {
        let json = r#"{"identity_ids":["a","b"],"embeddings":[[1.0]]}"#;
        let result = Gallery::from_bytes(json.as_bytes());
        assert!(matches!(
            result,
            Err(GalleryError::LengthMismatch { ids: 2, embeddings: 1 })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = Gallery::new(vec![entry("a", vec![1.0]), entry("a", vec![2.0])]);
        assert!(matches!(result, Err(GalleryError::DuplicateId(id)) if id == "a"));
    }

    #[test]
    fn test_inconsistent_dimension_rejected() {
        let result = Gallery::new(vec![entry("a", vec![1.0, 2.0]), entry("b", vec![1.0])]);
        assert!(matches!(
            result,
            Err(GalleryError::InconsistentDimension { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_empty_gallery_loads() {
        let json = r#"{"identity_ids":[],"embeddings":[]}"#;
        let gallery = Gallery::from_bytes(json.as_bytes()).unwrap();
        assert!(gallery.is_empty());
        assert_eq!(gallery.dim(), 0);
    }

    #[test]
    fn test_handle_swap_bumps_version() {
        let dir = std::env::temp_dir().join("rollcall-gallery-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gallery.json");
        std::fs::write(
            &path,
            r#"{"identity_ids":["a"],"embeddings":[[1.0,0.0]]}"#,
        )
        .unwrap();

        let handle = GalleryHandle::new(Gallery::new(vec![]).unwrap());
        assert_eq!(handle.version(), 1);
        assert!(handle.current().is_empty());

        let (version, entries) = handle.reload(&path).unwrap();
        assert_eq!(version, 2);
        assert_eq!(entries, 1);
        assert_eq!(handle.current().len(), 1);
    }

    #[test]
    fn test_handle_failed_reload_keeps_old_snapshot() {
        let handle = GalleryHandle::new(
            Gallery::new(vec![entry("a", vec![1.0])]).unwrap(),
        );
        let result = handle.reload(Path::new("/nonexistent/gallery.json"));
        assert!(result.is_err());
        assert_eq!(handle.version(), 1);
        assert_eq!(handle.current().len(), 1);
    }

    #[test]
    fn test_old_snapshot_survives_reload() {
        // A reader holding the old Arc keeps a complete snapshot even after
        // a swap.
        let dir = std::env::temp_dir().join("rollcall-gallery-test2");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gallery.json");
        std::fs::write(
            &path,
            r#"{"identity_ids":["b","c"],"embeddings":[[0.0],[1.0]]}"#,
        )
        .unwrap();

        let handle = GalleryHandle::new(
            Gallery::new(vec![entry("a", vec![5.0])]).unwrap(),
        );
        let old = handle.current();
        handle.reload(&path).unwrap();

        assert_eq!(old.len(), 1);
        assert_eq!(old.entries()[0].identity_id, "a");
        assert_eq!(handle.current().len(), 2);
    }
}
