//! Axum routes for recognition, verification and gallery management.

use crate::dto::*;
use crate::engine::{EngineError, EngineHandle};
use crate::state::GalleryStore;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use facegallery_core::{GalleryError, Recognition};
use image::RgbImage;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Base64 images inflate by a third; leave room for two large photos.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Shared across handlers.
pub struct AppState {
    pub engine: EngineHandle,
    pub gallery: Arc<GalleryStore>,
    pub threshold: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no trained embeddings loaded")]
    NotLoaded,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<GalleryError> for ApiError {
    fn from(e: GalleryError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotLoaded => (
                StatusCode::BAD_REQUEST,
                Some("run `facegallery train` first, then POST /reload".to_string()),
            ),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/recognize", post(recognize))
        .route("/verify", post(verify))
        .route("/reload", post(reload))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Decode a base64 image, tolerating a `data:image/...;base64,` prefix and
/// line-wrapped payloads.
fn decode_image(encoded: &str) -> Result<RgbImage, ApiError> {
    let payload = encoded.split_once(',').map(|(_, data)| data).unwrap_or(encoded);
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| ApiError::Internal(format!("error decoding image: {e}")))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| ApiError::Internal(format!("error decoding image: {e}")))?;
    Ok(image.to_rgb8())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e.body_text())))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let gallery = state.gallery.snapshot();
    let info = state.engine.info();
    Json(HealthResponse {
        status: "ok",
        model: info.model.clone(),
        detector: info.detector.clone(),
        embeddings_loaded: gallery.is_some(),
        person: gallery.map(|g| g.person_name.clone()),
    })
}

async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let engine = state.engine.info();
    Json(match state.gallery.snapshot() {
        Some(gallery) => InfoResponse::loaded(&gallery, &engine.model, &engine.detector, state.threshold),
        None => InfoResponse::not_loaded(),
    })
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let gallery = state.gallery.snapshot().ok_or(ApiError::NotLoaded)?;
    let request = json_body(payload)?;
    let encoded = request
        .image
        .ok_or_else(|| ApiError::BadRequest("no image provided".into()))?;

    let image = decode_image(&encoded)?;
    let recognition = match state.engine.represent(image).await? {
        Some(probe) => gallery.recognize(&probe, state.threshold)?,
        None => Recognition::NoFaceDetected,
    };

    match recognition.score() {
        Some(score) => tracing::info!(
            is_match = recognition.is_match(),
            max_similarity = score.max_similarity,
            "recognize"
        ),
        None => tracing::debug!("recognize: no face"),
    }

    let engine = state.engine.info();
    Ok(Json(RecognizeResponse::from_recognition(
        recognition,
        &gallery.person_name,
        state.threshold,
        &engine.model,
        &engine.detector,
    )))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let request = json_body(payload)?;
    let (Some(first), Some(second)) = (request.image1, request.image2) else {
        return Err(ApiError::BadRequest("two images are required".into()));
    };

    let first = decode_image(&first)?;
    let second = decode_image(&second)?;
    let verification = state.engine.verify(first, second).await?;

    Ok(Json(VerifyResponse {
        success: true,
        verified: verification.verified,
        distance: verification.distance,
        threshold: verification.threshold,
        model: verification.model,
    }))
}

async fn reload(State(state): State<Arc<AppState>>) -> Result<Json<ReloadResponse>, ApiError> {
    let store = state.gallery.clone();
    let reloaded = tokio::task::spawn_blocking(move || store.reload())
        .await
        .map_err(|e| ApiError::Internal(format!("reload task failed: {e}")))?;

    match reloaded {
        Ok(gallery) => Ok(Json(ReloadResponse {
            success: true,
            message: format!("embeddings for {} reloaded", gallery.person_name),
        })),
        Err(e) => {
            tracing::warn!(path = %state.gallery.path().display(), error = %e, "reload failed");
            Err(ApiError::Internal(format!("could not load embeddings: {e}")))
        }
    }
}
