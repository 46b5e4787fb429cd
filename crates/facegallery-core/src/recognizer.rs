//! Face embedding models via ONNX Runtime.
//!
//! Runs ArcFace (`w600k_r50`, NCHW) or Facenet512 (Keras export, NHWC) on an
//! aligned RGB face crop and returns an L2-normalized embedding.

use crate::alignment;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; place the ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

/// Supported embedding models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingModel {
    ArcFace,
    Facenet512,
}

impl EmbeddingModel {
    /// Identifier written to galleries and reported over HTTP.
    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingModel::ArcFace => "ArcFace",
            EmbeddingModel::Facenet512 => "Facenet512",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            EmbeddingModel::ArcFace => "w600k_r50.onnx",
            EmbeddingModel::Facenet512 => "facenet512.onnx",
        }
    }

    /// Side length of the square aligned crop.
    pub fn input_size(&self) -> u32 {
        match self {
            EmbeddingModel::ArcFace => 112,
            EmbeddingModel::Facenet512 => 160,
        }
    }

    pub fn layout(&self) -> TensorLayout {
        match self {
            EmbeddingModel::ArcFace => TensorLayout::Nchw,
            EmbeddingModel::Facenet512 => TensorLayout::Nhwc,
        }
    }

    /// `(mean, std)` applied per channel as `(pixel - mean) / std`.
    pub fn normalization(&self) -> (f32, f32) {
        match self {
            EmbeddingModel::ArcFace => (127.5, 127.5),
            EmbeddingModel::Facenet512 => (0.0, 255.0),
        }
    }

    pub fn embedding_dim(&self) -> usize {
        512
    }

    /// Cosine-distance cutoff for pairwise verification.
    pub fn verify_threshold(&self) -> f32 {
        match self {
            EmbeddingModel::ArcFace => 0.68,
            EmbeddingModel::Facenet512 => 0.30,
        }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmbeddingModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arcface" => Ok(EmbeddingModel::ArcFace),
            "facenet512" => Ok(EmbeddingModel::Facenet512),
            other => Err(format!("unknown embedding model '{other}' (expected ArcFace or Facenet512)")),
        }
    }
}

/// ONNX embedding extractor for one [`EmbeddingModel`].
pub struct FaceRecognizer {
    session: Session,
    model: EmbeddingModel,
}

impl FaceRecognizer {
    /// Load the model's ONNX export from `model_path`.
    pub fn load(model_path: &str, model: EmbeddingModel) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            model = model.name(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session, model })
    }

    pub fn model(&self) -> EmbeddingModel {
        self.model
    }

    /// Align the detected face and extract its embedding.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let crop = alignment::align_face(image, face, self.model.input_size());
        let input = preprocess(&crop, self.model);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let expected = self.model.embedding_dim();
        if raw.len() != expected {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {expected}-dim embedding from {}, got {}",
                self.model,
                raw.len()
            )));
        }

        Ok(Embedding::normalized(raw.to_vec()))
    }
}

/// Convert an aligned RGB crop into the model's input tensor.
fn preprocess(crop: &RgbImage, model: EmbeddingModel) -> Array4<f32> {
    let size = model.input_size() as usize;
    let (mean, std) = model.normalization();

    let mut tensor = match model.layout() {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, size, size)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, 3)),
    };

    for (x, y, pixel) in crop.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= size || y >= size {
            continue;
        }
        for c in 0..3 {
            let value = (pixel[c] as f32 - mean) / std;
            match model.layout() {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
            }
        }
    }

    tensor
}
