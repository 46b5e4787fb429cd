//! Gallery persistence and matching.
//!
//! A gallery is one person's embeddings plus provenance, stored as a
//! pretty-printed JSON file with a timestamped backup written alongside.

use crate::training::SimilarityStats;
use crate::types::{CosineMatcher, Embedding, Matcher, Recognition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the primary gallery inside its directory.
pub const PRIMARY_FILE_NAME: &str = "face_embeddings.json";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery file not found: {0}")]
    NotFound(String),
    #[error("gallery I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gallery has no embeddings")]
    Empty,
    #[error("no embeddings to save")]
    NothingToSave,
    #[error("embedding {index} has {found} dimensions, expected {expected}")]
    InconsistentDimensions {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("dimension mismatch: gallery has {gallery}-dim embeddings, model produces {model}")]
    DimensionMismatch { gallery: usize, model: usize },
}

/// A photo that could not be turned into an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPhoto {
    pub path: String,
    pub error: String,
}

/// On-disk gallery layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub detector: String,
    #[serde(default)]
    pub embeddings: Vec<Embedding>,
    #[serde(default)]
    pub embedding_size: usize,
    #[serde(default)]
    pub num_photos: usize,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub valid_photos: Vec<String>,
    #[serde(default)]
    pub failed_photos: Vec<FailedPhoto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<SimilarityStats>,
}

/// Paths written by [`GalleryFile::save`].
#[derive(Debug, Clone)]
pub struct SavedGallery {
    pub primary: PathBuf,
    pub backup: PathBuf,
}

impl GalleryFile {
    /// Backup file name: `face_embeddings_<name>_<unix seconds>.json`, spaces → `_`.
    pub fn backup_file_name(&self, unix_secs: i64) -> String {
        format!("face_embeddings_{}_{unix_secs}.json", self.name.replace(' ', "_"))
    }

    /// Write the primary file and a timestamped backup into `dir`.
    ///
    /// Nothing is written when the gallery holds no embeddings.
    pub fn save(&self, dir: &Path) -> Result<SavedGallery, GalleryError> {
        if self.embeddings.is_empty() {
            return Err(GalleryError::NothingToSave);
        }

        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;

        let primary = dir.join(PRIMARY_FILE_NAME);
        std::fs::write(&primary, &json)?;

        let backup = dir.join(self.backup_file_name(chrono::Utc::now().timestamp()));
        std::fs::write(&backup, &json)?;

        tracing::info!(
            primary = %primary.display(),
            backup = %backup.display(),
            embeddings = self.embeddings.len(),
            "gallery saved"
        );

        Ok(SavedGallery { primary, backup })
    }
}

/// Validated, immutable gallery snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Gallery {
    pub person_name: String,
    pub model: String,
    pub detector: String,
    pub embeddings: Vec<Embedding>,
    pub dimension: usize,
    pub created_at: String,
    pub source: PathBuf,
    /// Hex SHA-256 of the file contents.
    pub fingerprint: String,
}

impl Gallery {
    /// Read and validate a gallery file.
    ///
    /// `expected_dim` is the active model's output size; a gallery built with a
    /// different dimensionality is rejected rather than compared.
    pub fn load(path: &Path, expected_dim: Option<usize>) -> Result<Self, GalleryError> {
        if !path.exists() {
            return Err(GalleryError::NotFound(path.display().to_string()));
        }

        let bytes = std::fs::read(path)?;
        let fingerprint = format!("{:x}", Sha256::digest(&bytes));
        let file: GalleryFile = serde_json::from_slice(&bytes)?;

        let gallery = Self::from_file(file, path.to_path_buf(), fingerprint, expected_dim)?;

        tracing::info!(
            path = %path.display(),
            person = %gallery.person_name,
            embeddings = gallery.embeddings.len(),
            dimension = gallery.dimension,
            model = %gallery.model,
            "gallery loaded"
        );

        Ok(gallery)
    }

    fn from_file(
        file: GalleryFile,
        source: PathBuf,
        fingerprint: String,
        expected_dim: Option<usize>,
    ) -> Result<Self, GalleryError> {
        let dimension = file.embeddings.first().map(Embedding::dim).ok_or(GalleryError::Empty)?;

        if let Some((index, e)) = file.embeddings.iter().enumerate().find(|(_, e)| e.dim() != dimension) {
            return Err(GalleryError::InconsistentDimensions {
                index,
                expected: dimension,
                found: e.dim(),
            });
        }

        if let Some(model) = expected_dim {
            if model != dimension {
                return Err(GalleryError::DimensionMismatch {
                    gallery: dimension,
                    model,
                });
            }
        }

        Ok(Self {
            person_name: file.name,
            model: file.model,
            detector: file.detector,
            embeddings: file.embeddings,
            dimension,
            created_at: file.timestamp,
            source,
            fingerprint,
        })
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Score `probe` against every stored embedding and apply `threshold`.
    pub fn recognize(&self, probe: &Embedding, threshold: f32) -> Result<Recognition, GalleryError> {
        if probe.dim() != self.dimension {
            return Err(GalleryError::DimensionMismatch {
                gallery: self.dimension,
                model: probe.dim(),
            });
        }

        let score = CosineMatcher.score(probe, &self.embeddings).ok_or(GalleryError::Empty)?;
        Ok(Recognition::decide(score, threshold))
    }
}
