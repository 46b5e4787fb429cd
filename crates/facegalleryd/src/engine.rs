use facegallery_core::{Embedding, FacePipeline, PipelineError, Verification};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Static description of the pipeline owned by the engine thread.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model: String,
    pub detector: String,
    pub embedding_dim: usize,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Represent {
        image: RgbImage,
        reply: oneshot::Sender<Result<Option<Embedding>, PipelineError>>,
    },
    Verify {
        first: RgbImage,
        second: RgbImage,
        reply: oneshot::Sender<Result<Verification, PipelineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    info: ModelInfo,
}

impl EngineHandle {
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Embed the most confident face in `image`; `None` when there is no face.
    pub async fn represent(&self, image: RgbImage) -> Result<Option<Embedding>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Represent { image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Pairwise verification of two images.
    pub async fn verify(&self, first: RgbImage, second: RgbImage) -> Result<Verification, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify { first, second, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Move `pipeline` onto a dedicated OS thread and return a handle to it.
///
/// Inference is blocking, so it never runs on the async runtime. Requests
/// are served one at a time in arrival order.
pub fn spawn_engine<P>(mut pipeline: P) -> Result<EngineHandle, EngineError>
where
    P: FacePipeline + Send + 'static,
{
    let info = ModelInfo {
        model: pipeline.model_name().to_string(),
        detector: pipeline.detector_name().to_string(),
        embedding_dim: pipeline.embedding_dim(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegallery-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Represent { image, reply } => {
                        let _ = reply.send(pipeline.represent(&image));
                    }
                    EngineRequest::Verify { first, second, reply } => {
                        let _ = reply.send(pipeline.verify(&first, &second));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    tracing::info!(model = %info.model, detector = %info.detector, dim = info.embedding_dim, "engine ready");
    Ok(EngineHandle { tx, info })
}
