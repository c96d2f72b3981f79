//! Object detection on decoded frames.
//!
//! One worker thread owns the loaded network and runs the stages in order:
//! frame-skip scheduling, preprocessing, inference, decoding with NMS and the
//! overlay. The network is never touched from any other thread.

mod backend;
mod backends;
mod catalog;
mod engine;
mod overlay;
mod postprocess;
mod preprocess;
mod result;
mod scheduler;

use std::path::PathBuf;

use crate::frame::FrameError;

pub use backend::InferenceBackend;
pub use backends::{load_backend, StubBackend};
#[cfg(feature = "backend-opencv")]
pub use backends::DarknetBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use catalog::ClassCatalog;
pub use engine::{DetectionEngine, EngineStats};
pub use overlay::{estimate_distance, label_text, DistanceFilter, OverlayRenderer, PanelStats, PALETTE};
pub use postprocess::{
    decode, nms, PostprocessConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD,
};
pub use preprocess::{InferenceGeometry, Preprocessor};
pub use result::{BoundingBox, Detection, DetectionOutcome};
pub use scheduler::{Detector, FrameScheduler};

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// The model failed to load; detection is off for this process.
    #[error("object detection unavailable: {0}")]
    Unavailable(String),

    #[error("cannot read model file {}: {source}", path.display())]
    ModelFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inference backend error: {0}")]
    Backend(String),

    #[error("network produced no outputs")]
    EmptyOutput,

    #[error("unexpected tensor shape {0:?}")]
    TensorShape(Vec<usize>),

    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("failed to spawn detection worker: {0}")]
    Spawn(#[from] std::io::Error),
}
