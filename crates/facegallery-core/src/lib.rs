//! facegallery-core: Face gallery engine.
//!
//! SCRFD finds faces, an ONNX embedding model (ArcFace or Facenet512) turns
//! aligned crops into vectors, and a cosine matcher scores probes against a
//! single person's gallery persisted as JSON.

pub mod alignment;
pub mod detector;
pub mod gallery;
pub mod pipeline;
pub mod recognizer;
pub mod training;
pub mod types;

pub use detector::FaceDetector;
pub use gallery::{Gallery, GalleryError, GalleryFile};
pub use pipeline::{FacePipeline, OnnxPipeline, PipelineError, Verification};
pub use recognizer::{EmbeddingModel, FaceRecognizer};
pub use types::{BoundingBox, CosineMatcher, Embedding, GalleryScore, Matcher, Recognition};

use std::path::PathBuf;

/// Identifier reported for the SCRFD detector backend.
pub const DETECTOR_NAME: &str = "scrfd";

/// Default directory holding the ONNX model files.
///
/// `$XDG_DATA_HOME/facegallery/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegallery")
        .join("models")
}
