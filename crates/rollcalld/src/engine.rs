//! Vision thread.
//!
//! ONNX sessions hold mutable state and cannot be shared across request
//! handlers, so both models live on one dedicated OS thread behind a request
//! channel. Handlers talk to it through a clone-safe [`VisionHandle`].

use std::path::Path;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use rollcall_vision::{
    BestMatch, DetectionReport, DistanceMetric, Embedding, FaceVision, GalleryEntry, VisionError,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("vision thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the vision thread.
enum VisionRequest {
    Verify {
        photo: Vec<u8>,
        reply: oneshot::Sender<Result<DetectionReport, VisionError>>,
    },
    Embed {
        photo: Vec<u8>,
        reply: oneshot::Sender<Result<Embedding, VisionError>>,
    },
    Match {
        photo: Vec<u8>,
        gallery: Vec<GalleryEntry>,
        reply: oneshot::Sender<Result<Option<BestMatch>, VisionError>>,
    },
}

/// Clone-safe handle to the vision thread.
#[derive(Clone)]
pub struct VisionHandle {
    tx: mpsc::Sender<VisionRequest>,
}

impl VisionHandle {
    /// Screen a photo: face count, best confidence, dimensions.
    pub async fn verify(&self, photo: Vec<u8>) -> Result<DetectionReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VisionRequest::Verify {
                photo,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Extract the reference embedding from an enrollment photo.
    pub async fn embed(&self, photo: Vec<u8>) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VisionRequest::Embed {
                photo,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Find the closest gallery entry to the face in a photo.
    pub async fn best_match(
        &self,
        photo: Vec<u8>,
        gallery: Vec<GalleryEntry>,
    ) -> Result<Option<BestMatch>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VisionRequest::Match {
                photo,
                gallery,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the vision pipeline on a dedicated OS thread.
///
/// Loads both ONNX models synchronously before spawning, so a missing or
/// broken model fails daemon startup instead of the first request.
pub fn spawn_vision(model_dir: &Path, metric: DistanceMetric) -> Result<VisionHandle, EngineError> {
    let mut vision = FaceVision::load(model_dir, metric)?;
    tracing::info!(dir = %model_dir.display(), ?metric, "vision models loaded");

    let (tx, mut rx) = mpsc::channel::<VisionRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-vision".into())
        .spawn(move || {
            tracing::info!("vision thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    VisionRequest::Verify { photo, reply } => {
                        let _ = reply.send(vision.detect_and_verify(&photo));
                    }
                    VisionRequest::Embed { photo, reply } => {
                        let _ = reply.send(vision.extract_embedding(&photo));
                    }
                    VisionRequest::Match {
                        photo,
                        gallery,
                        reply,
                    } => {
                        let _ = reply.send(vision.find_best_match(&photo, &gallery));
                    }
                }
            }
            tracing::info!("vision thread exiting");
        })
        .expect("failed to spawn vision thread");

    Ok(VisionHandle { tx })
}
