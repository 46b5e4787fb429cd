use facegallery_core::EmbeddingModel;
use std::path::PathBuf;
use std::str::FromStr;

/// Service configuration, loaded from environment variables.
pub struct Config {
    /// Listen address (default: 0.0.0.0:5000).
    pub bind_addr: String,
    /// Directory containing `det_10g.onnx` and the embedding model.
    pub model_dir: PathBuf,
    /// Embedding model used for queries; galleries must match its dimensionality.
    pub model: EmbeddingModel,
    /// Gallery JSON written by the trainer.
    pub gallery_path: PathBuf,
    /// Best cosine similarity must exceed this for a match.
    pub similarity_threshold: f32,
}

impl Config {
    /// Load configuration from `FACEGALLERY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEGALLERY_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facegallery_core::default_model_dir());

        Self {
            bind_addr: std::env::var("FACEGALLERY_BIND").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            model_dir,
            model: env_parse("FACEGALLERY_MODEL", EmbeddingModel::Facenet512),
            gallery_path: std::env::var("FACEGALLERY_GALLERY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("trained-faces/face_embeddings.json")),
            similarity_threshold: env_parse("FACEGALLERY_THRESHOLD", 0.4),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}
