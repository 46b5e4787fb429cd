use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod dto;
mod engine;
mod state;

use api::AppState;
use config::Config;
use engine::spawn_engine;
use facegallery_core::{FacePipeline, OnnxPipeline};
use state::GalleryStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(
        model = %config.model,
        model_dir = %config.model_dir.display(),
        gallery = %config.gallery_path.display(),
        threshold = config.similarity_threshold,
        "facegalleryd starting"
    );

    let pipeline = OnnxPipeline::load(&config.model_dir, config.model)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let embedding_dim = pipeline.embedding_dim();
    let engine = spawn_engine(pipeline)?;

    let gallery = Arc::new(GalleryStore::new(
        config.gallery_path.clone(),
        config.model.name(),
        embedding_dim,
    ));
    match gallery.reload() {
        Ok(g) => tracing::info!(person = %g.person_name, embeddings = g.len(), "gallery loaded"),
        Err(e) => tracing::warn!(
            path = %config.gallery_path.display(),
            error = %e,
            "no gallery loaded; recognition disabled until POST /reload"
        ),
    }

    let state = Arc::new(AppState {
        engine,
        gallery,
        threshold: config.similarity_threshold,
    });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "facegalleryd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facegalleryd shutting down");
        })
        .await?;

    Ok(())
}
