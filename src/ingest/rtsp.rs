//! Graph backend dispatch.
//!
//! `stub://` URLs get the synthetic graph; everything else needs GStreamer.

use std::sync::Arc;
use std::time::Duration;

use super::bus::BusEvent;
use super::endpoint::{EndpointKind, StreamEndpoint};
use super::graph::PipelineState;
#[cfg(feature = "rtsp-gstreamer")]
use super::gst::GstGraph;
use super::session::Session;
use super::synthetic::{SyntheticControl, SyntheticGraph};
use super::IngestError;

/// One live processing graph.
pub(crate) enum RtspGraph {
    Synthetic(SyntheticGraph),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstGraph),
}

impl RtspGraph {
    /// Build the static skeleton and install the negotiation callback.
    pub fn build(endpoint: &StreamEndpoint, session: Arc<Session>) -> Result<Self, IngestError> {
        match endpoint.kind() {
            EndpointKind::Synthetic => Ok(Self::Synthetic(SyntheticGraph::build(endpoint, session)?)),
            EndpointKind::Rtsp => {
                #[cfg(feature = "rtsp-gstreamer")]
                {
                    Ok(Self::Gstreamer(GstGraph::build(endpoint, session)?))
                }
                #[cfg(not(feature = "rtsp-gstreamer"))]
                {
                    let _ = session;
                    Err(IngestError::Unsupported(
                        "RTSP requires the rtsp-gstreamer feature".to_string(),
                    ))
                }
            }
        }
    }

    pub fn set_state(&self, target: PipelineState, timeout: Duration) -> Result<(), IngestError> {
        match self {
            Self::Synthetic(graph) => {
                let _ = timeout;
                graph.set_state(target)
            }
            #[cfg(feature = "rtsp-gstreamer")]
            Self::Gstreamer(graph) => graph.set_state(target, timeout),
        }
    }

    /// Soft recovery: back to Null and up to Playing without rebuilding.
    pub fn bounce(&self, timeout: Duration) -> Result<(), IngestError> {
        self.set_state(PipelineState::Null, timeout)?;
        self.set_state(PipelineState::Ready, timeout)?;
        self.set_state(PipelineState::Playing, timeout)
    }

    pub fn next_event(&self, timeout: Duration) -> Option<BusEvent> {
        match self {
            Self::Synthetic(graph) => graph.next_event(timeout),
            #[cfg(feature = "rtsp-gstreamer")]
            Self::Gstreamer(graph) => graph.next_event(timeout),
        }
    }

    pub fn negotiated_caps(&self) -> Option<String> {
        match self {
            Self::Synthetic(graph) => graph.negotiated_caps(),
            #[cfg(feature = "rtsp-gstreamer")]
            Self::Gstreamer(graph) => graph.negotiated_caps(),
        }
    }

    pub fn control(&self) -> GraphControl {
        match self {
            Self::Synthetic(graph) => GraphControl::Synthetic(graph.control()),
            #[cfg(feature = "rtsp-gstreamer")]
            Self::Gstreamer(graph) => GraphControl::Gstreamer(graph.control()),
        }
    }
}

/// Thread-safe handle that can force a graph to Null from outside its
/// driving thread.
#[derive(Clone)]
pub(crate) enum GraphControl {
    Synthetic(SyntheticControl),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(gstreamer::Pipeline),
}

impl GraphControl {
    pub fn force_null(&self) {
        match self {
            Self::Synthetic(control) => control.force_null(),
            #[cfg(feature = "rtsp-gstreamer")]
            Self::Gstreamer(pipeline) => {
                use gstreamer::prelude::*;
                if pipeline.set_state(gstreamer::State::Null).is_err() {
                    log::warn!("forced NULL transition failed");
                }
            }
        }
    }
}
