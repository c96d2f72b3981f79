//! State shared between the driving thread, graph callbacks and readers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::perf::PerfReadout;

use super::extract::{FrameExtractor, FrameSubscribers};
use super::graph::GraphSpec;
use super::negotiate::{negotiate, DecodeChain, MediaCodec, Negotiation, PadCaps};
use super::params::VideoParameters;
use super::IngestError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchOutcome {
    Attached(MediaCodec),
    /// A chain exists already; the caller relinks the new pad to it.
    AlreadyAttached(MediaCodec),
    Ignored,
}

/// Handles a graph backend needs while a run is live.
pub struct Session {
    tag: String,
    params: Arc<VideoParameters>,
    graph: Mutex<GraphSpec>,
    frames: FrameSubscribers,
    ingest_perf: PerfReadout,
    abandoned: Mutex<Option<String>>,
}

impl Session {
    pub fn new(
        tag: String,
        params: Arc<VideoParameters>,
        frames: FrameSubscribers,
        ingest_perf: PerfReadout,
    ) -> Self {
        Self {
            tag,
            params,
            graph: Mutex::new(GraphSpec::skeleton()),
            frames,
            ingest_perf,
            abandoned: Mutex::new(None),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn params(&self) -> &Arc<VideoParameters> {
        &self.params
    }

    pub fn graph(&self) -> GraphSpec {
        self.graph.lock().clone()
    }

    pub fn extractor(&self) -> FrameExtractor {
        FrameExtractor::new(
            self.frames.clone(),
            self.ingest_perf.clone(),
            Arc::clone(&self.params),
        )
    }

    /// Factory whose construction failure abandoned the video branch.
    pub fn abandoned_by(&self) -> Option<String> {
        self.abandoned.lock().clone()
    }

    /// Run negotiation for a newly exposed branch.
    ///
    /// `build` creates and links the real elements for the chosen chain; the
    /// graph model only changes if it succeeds.
    pub fn on_new_branch<F>(&self, caps: &PadCaps, build: F) -> Result<BranchOutcome, IngestError>
    where
        F: FnOnce(DecodeChain) -> Result<(), IngestError>,
    {
        let chain = match negotiate(caps) {
            Negotiation::IgnoreAudio => {
                log::debug!(
                    "[{}] ignoring audio branch {}",
                    self.tag,
                    caps.encoding_name.as_deref().unwrap_or("?")
                );
                return Ok(BranchOutcome::Ignored);
            }
            Negotiation::Unsupported(encoding) => {
                log::warn!("[{}] unsupported encoding {encoding:?}, branch left unlinked", self.tag);
                return Ok(BranchOutcome::Ignored);
            }
            Negotiation::Attach(chain) => chain,
        };

        let mut graph = self.graph.lock();
        if let Some(existing) = graph.chain() {
            return Ok(BranchOutcome::AlreadyAttached(existing.codec));
        }
        let next = graph.with_decode_chain(chain)?;
        if let Err(e) = build(chain) {
            if let IngestError::ElementMissing { factory } = &e {
                *self.abandoned.lock() = Some(factory.clone());
            }
            return Err(e);
        }
        *graph = next;
        drop(graph);

        if self.params.observe(caps) {
            log::debug!("[{}] video parameters latched from pad caps", self.tag);
        }
        log::info!("[{}] attached {} decode chain", self.tag, chain.codec);
        Ok(BranchOutcome::Attached(chain.codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "test".into(),
            Arc::new(VideoParameters::new()),
            FrameSubscribers::default(),
            PerfReadout::default(),
        )
    }

    #[test]
    fn audio_branch_adds_no_elements() {
        let session = session();
        let outcome = session
            .on_new_branch(&PadCaps::audio("PCMU"), |_| panic!("must not build"))
            .unwrap();
        assert_eq!(outcome, BranchOutcome::Ignored);
        assert_eq!(session.graph().len(), 3);
    }

    #[test]
    fn failed_build_leaves_graph_untouched() {
        let session = session();
        let result = session.on_new_branch(&PadCaps::video("H264"), |_| {
            Err(IngestError::ElementMissing {
                factory: "avdec_h264".into(),
            })
        });
        assert!(result.is_err());
        assert!(session.graph().chain().is_none());
        assert_eq!(session.abandoned_by().as_deref(), Some("avdec_h264"));
    }

    #[test]
    fn second_video_branch_reuses_chain() {
        let session = session();
        let caps = PadCaps::video("H264")
            .with_size(640, 360)
            .with_framerate(25, 1);
        assert_eq!(
            session.on_new_branch(&caps, |_| Ok(())).unwrap(),
            BranchOutcome::Attached(MediaCodec::H264)
        );
        assert!(session.params().is_detected());
        assert_eq!(
            session
                .on_new_branch(&PadCaps::video("H265"), |_| panic!("no second chain"))
                .unwrap(),
            BranchOutcome::AlreadyAttached(MediaCodec::H264)
        );
        assert_eq!(session.graph().len(), 6);
    }
}
