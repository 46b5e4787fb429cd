//! Detection + embedding behind a single seam.
//!
//! Everything above this module (training, matching, HTTP) only talks to
//! [`FacePipeline`], so it can run against a stub in tests.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{EmbeddingModel, FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use crate::DETECTOR_NAME;
use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("face could not be detected in image{0}")]
    NoFaceInImage(u8),
}

/// Result of comparing two images of (possibly) the same person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub verified: bool,
    /// Cosine distance between the two embeddings.
    pub distance: f32,
    pub threshold: f32,
    pub model: String,
}

/// A face detector paired with an embedding model.
pub trait FacePipeline {
    fn model_name(&self) -> &str;

    fn detector_name(&self) -> &str;

    fn embedding_dim(&self) -> usize;

    /// Cosine-distance cutoff used by [`verify`](Self::verify).
    fn verify_threshold(&self) -> f32;

    /// Embed the most confident face in `image`. `Ok(None)` when no face is found.
    fn represent(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError>;

    /// Decide whether two images show the same person.
    fn verify(&mut self, first: &RgbImage, second: &RgbImage) -> Result<Verification, PipelineError> {
        let a = self.represent(first)?.ok_or(PipelineError::NoFaceInImage(1))?;
        let b = self.represent(second)?.ok_or(PipelineError::NoFaceInImage(2))?;

        let distance = a.distance(&b);
        let threshold = self.verify_threshold();
        Ok(Verification {
            verified: distance <= threshold,
            distance,
            threshold,
            model: self.model_name().to_string(),
        })
    }
}

/// SCRFD detector + ONNX embedding model.
pub struct OnnxPipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxPipeline {
    pub const DETECTOR_FILE: &'static str = "det_10g.onnx";

    /// Load `det_10g.onnx` and the model's ONNX file from `model_dir`.
    pub fn load(model_dir: &Path, model: EmbeddingModel) -> Result<Self, PipelineError> {
        let det_path = model_dir.join(Self::DETECTOR_FILE);
        let rec_path = model_dir.join(model.file_name());

        let detector = FaceDetector::load(&det_path.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&rec_path.to_string_lossy(), model)?;
        Ok(Self { detector, recognizer })
    }
}

impl FacePipeline for OnnxPipeline {
    fn model_name(&self) -> &str {
        self.recognizer.model().name()
    }

    fn detector_name(&self) -> &str {
        DETECTOR_NAME
    }

    fn embedding_dim(&self) -> usize {
        self.recognizer.model().embedding_dim()
    }

    fn verify_threshold(&self) -> f32 {
        self.recognizer.model().verify_threshold()
    }

    fn represent(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
        let faces = self.detector.detect(image)?;
        let Some(face) = faces.first() else {
            tracing::debug!(width = image.width(), height = image.height(), "no face detected");
            return Ok(None);
        };

        tracing::debug!(confidence = face.confidence, faces = faces.len(), "embedding best face");
        Ok(Some(self.recognizer.extract(image, face)?))
    }
}
