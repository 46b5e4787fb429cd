use facegallery_core::{Gallery, GalleryError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// The currently loaded gallery, swapped wholesale on reload.
///
/// Readers take an `Arc` snapshot and never observe a half-replaced gallery.
pub struct GalleryStore {
    path: PathBuf,
    model: String,
    embedding_dim: usize,
    current: RwLock<Option<Arc<Gallery>>>,
}

impl GalleryStore {
    /// Empty store for `path`; galleries must have `embedding_dim` dimensions.
    pub fn new(path: PathBuf, model: impl Into<String>, embedding_dim: usize) -> Self {
        Self {
            path,
            model: model.into(),
            embedding_dim,
            current: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Option<Arc<Gallery>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the gallery file and replace the loaded one.
    ///
    /// A missing file or one without embeddings unloads the gallery, matching
    /// a fresh start on the same file. Any other failure keeps the previous one.
    pub fn reload(&self) -> Result<Arc<Gallery>, GalleryError> {
        let gallery = match Gallery::load(&self.path, Some(self.embedding_dim)) {
            Ok(gallery) => Arc::new(gallery),
            Err(e @ (GalleryError::Empty | GalleryError::NotFound(_))) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !gallery.model.is_empty() && !gallery.model.eq_ignore_ascii_case(&self.model) {
            tracing::warn!(
                gallery_model = %gallery.model,
                active_model = %self.model,
                "gallery was trained with a different model; similarities may be meaningless"
            );
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(gallery.clone());
        Ok(gallery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegallery_core::{Embedding, GalleryFile};
    use tempfile::tempdir;

    fn write_gallery(dir: &Path, vectors: Vec<Vec<f32>>) -> PathBuf {
        let file = GalleryFile {
            name: "Ana".into(),
            model: "Stub".into(),
            detector: "none".into(),
            embedding_size: vectors.first().map(Vec::len).unwrap_or(0),
            num_photos: vectors.len(),
            embeddings: vectors.into_iter().map(Embedding::new).collect(),
            timestamp: "2026-01-01T00:00:00+00:00".into(),
            valid_photos: Vec::new(),
            failed_photos: Vec::new(),
            statistics: None,
        };
        file.save(dir).unwrap().primary
    }

    #[test]
    fn test_starts_unloaded() {
        let store = GalleryStore::new(PathBuf::from("/nonexistent/face_embeddings.json"), "Stub", 2);
        assert!(store.snapshot().is_none());
        assert!(matches!(store.reload(), Err(GalleryError::NotFound(_))));
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_reload_unchanged_file_is_identical() {
        let dir = tempdir().unwrap();
        let path = write_gallery(dir.path(), vec![vec![1.0, 0.0], vec![0.6, 0.8]]);
        let store = GalleryStore::new(path, "Stub", 2);

        let first = store.reload().unwrap();
        let second = store.reload().unwrap();
        assert_eq!(*first, *second);
        assert_eq!(*store.snapshot().unwrap(), *first);
    }

    #[test]
    fn test_malformed_reload_keeps_previous_gallery() {
        let dir = tempdir().unwrap();
        let path = write_gallery(dir.path(), vec![vec![1.0, 0.0]]);
        let store = GalleryStore::new(path.clone(), "Stub", 2);
        let loaded = store.reload().unwrap();

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(store.reload(), Err(GalleryError::Parse(_))));
        assert_eq!(*store.snapshot().unwrap(), *loaded);

        write_gallery(dir.path(), vec![vec![1.0, 0.0, 0.0]]);
        assert!(matches!(store.reload(), Err(GalleryError::DimensionMismatch { .. })));
        assert_eq!(*store.snapshot().unwrap(), *loaded);
    }

    #[test]
    fn test_emptied_gallery_unloads_like_a_fresh_start() {
        let dir = tempdir().unwrap();
        let path = write_gallery(dir.path(), vec![vec![1.0, 0.0]]);
        let store = GalleryStore::new(path.clone(), "Stub", 2);
        store.reload().unwrap();

        for emptied in [r#"{"name": "Ana", "embeddings": []}"#, r#"{"name": "Ana"}"#] {
            std::fs::write(&path, emptied).unwrap();
            assert!(matches!(store.reload(), Err(GalleryError::Empty)));
            assert!(store.snapshot().is_none());

            let fresh = GalleryStore::new(path.clone(), "Stub", 2);
            assert!(fresh.reload().is_err());
            assert_eq!(store.snapshot(), fresh.snapshot());

            write_gallery(dir.path(), vec![vec![1.0, 0.0]]);
            store.reload().unwrap();
        }

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(store.reload(), Err(GalleryError::NotFound(_))));
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let dir = tempdir().unwrap();
        let path = write_gallery(dir.path(), vec![vec![1.0, 0.0]]);
        let store = GalleryStore::new(path, "Stub", 2);
        store.reload().unwrap();

        let held = store.snapshot().unwrap();
        write_gallery(dir.path(), vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        store.reload().unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(store.snapshot().unwrap().len(), 2);
    }
}
