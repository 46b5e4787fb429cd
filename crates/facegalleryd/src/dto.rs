//! HTTP request/response bodies.

use facegallery_core::{Gallery, GalleryScore, Recognition};
use serde::{Deserialize, Serialize};

/// Shown as `person_name` when the probe does not match.
pub const UNKNOWN_PERSON: &str = "Unknown";

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub image1: Option<String>,
    pub image2: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub detector: String,
    pub embeddings_loaded: bool,
    pub person: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InfoResponse {
    NotLoaded {
        loaded: bool,
        message: &'static str,
    },
    Loaded {
        loaded: bool,
        person_name: String,
        num_embeddings: usize,
        embedding_dimension: usize,
        model: String,
        detector: String,
        threshold: f32,
        embeddings_file: String,
        created_at: String,
        fingerprint: String,
    },
}

impl InfoResponse {
    pub fn not_loaded() -> Self {
        InfoResponse::NotLoaded {
            loaded: false,
            message: "no embeddings loaded",
        }
    }

    /// `model`/`detector` describe the running pipeline, not the file's metadata.
    pub fn loaded(gallery: &Gallery, model: &str, detector: &str, threshold: f32) -> Self {
        InfoResponse::Loaded {
            loaded: true,
            person_name: gallery.person_name.clone(),
            num_embeddings: gallery.len(),
            embedding_dimension: gallery.dimension,
            model: model.to_string(),
            detector: detector.to_string(),
            threshold,
            embeddings_file: gallery.source.display().to_string(),
            created_at: gallery.created_at.clone(),
            fingerprint: gallery.fingerprint.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchDetails {
    pub model: String,
    pub detector: String,
    pub num_comparisons: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RecognizeResponse {
    Scored {
        success: bool,
        face_detected: bool,
        is_match: bool,
        person_name: String,
        confidence: f32,
        max_similarity: f32,
        avg_similarity: f32,
        threshold: f32,
        details: MatchDetails,
    },
    NoFace {
        success: bool,
        face_detected: bool,
        message: &'static str,
    },
}

impl RecognizeResponse {
    pub fn from_recognition(
        recognition: Recognition,
        person: &str,
        threshold: f32,
        model: &str,
        detector: &str,
    ) -> Self {
        let scored = |score: GalleryScore, is_match: bool| RecognizeResponse::Scored {
            success: true,
            face_detected: true,
            is_match,
            person_name: if is_match { person } else { UNKNOWN_PERSON }.to_string(),
            confidence: score.confidence(),
            max_similarity: score.max_similarity,
            avg_similarity: score.avg_similarity,
            threshold,
            details: MatchDetails {
                model: model.to_string(),
                detector: detector.to_string(),
                num_comparisons: score.comparisons,
            },
        };

        match recognition {
            Recognition::Matched(score) => scored(score, true),
            Recognition::NotMatched(score) => scored(score, false),
            Recognition::NoFaceDetected => RecognizeResponse::NoFace {
                success: true,
                face_detected: false,
                message: "no face detected",
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
