//! Live stream ingestion.
//!
//! The pipeline connects to a network source, negotiates the video codec
//! once the source exposes its branches, decodes, converts to packed BGR and
//! hands owned frames to subscribers. Two graph backends exist:
//! - `stub://` URLs run an in-process synthetic graph (always available)
//! - `rtsp://` URLs run a GStreamer graph (feature: rtsp-gstreamer)
//!
//! Transport failures tear the graph down and reconnect; a user stop is
//! terminal.
//!
//! The ingestion layer MUST NOT:
//! - Block on a slow consumer (delivery is latest-wins)
//! - Attach a decoder to an audio branch
//! - Log raw frame content

pub mod bus;
pub mod endpoint;
pub mod env;
pub mod extract;
pub mod graph;
#[cfg(feature = "rtsp-gstreamer")]
mod gst;
pub mod negotiate;
pub mod params;
pub mod pipeline;
pub mod rtsp;
pub mod session;
mod synthetic;

use std::time::Duration;

pub use endpoint::{StreamEndpoint, TransportMode};
pub use env::init_media_framework;
pub use graph::{GraphSpec, PipelineState};
pub use negotiate::{MediaCodec, PadCaps};
pub use params::{VideoParameters, VideoParams};
pub use pipeline::{IngestPipeline, IngestSettings};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid stream endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("no stream endpoint configured")]
    NoEndpoint,

    #[error("failed to create element {factory}")]
    ElementMissing { factory: String },

    #[error("failed to link {from} -> {to}")]
    Link { from: String, to: String },

    #[error("a {existing} decode chain is already attached")]
    ChainAlreadyAttached { existing: MediaCodec },

    #[error("state change to {target} failed")]
    StateChange { target: PipelineState },

    #[error("state change to {target} did not complete within {timeout:?}")]
    StateTimeout {
        target: PipelineState,
        timeout: Duration,
    },

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("{0}")]
    Unsupported(String),

    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl IngestError {
    /// Construction failures disable the pipeline instead of reconnecting.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::ElementMissing { .. } | Self::InvalidEndpoint { .. } | Self::Unsupported(_)
        )
    }
}
