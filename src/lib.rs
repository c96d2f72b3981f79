//! Streamsight
//!
//! Live RTSP ingest with adaptive, real-time object detection overlays.
//!
//! # Architecture
//!
//! Three contexts run concurrently and share nothing but owned frames:
//!
//! 1. **Ingest**: one thread per stream drives the media graph, negotiates
//!    the codec when the source exposes a branch, and publishes decoded BGR
//!    frames. Transport failures reconnect; a user stop is terminal.
//! 2. **Detection**: one worker owns the network and processes the newest
//!    frame it has been given, skipping frames by a fixed factor.
//! 3. **Consumer**: whatever displays or records the annotated frames.
//!
//! Delivery between contexts is latest-wins: a slow consumer never stalls
//! the producer, it only sees fewer frames.
//!
//! # Module Structure
//!
//! - `frame`: owned image type and the single copy out of decoder memory
//! - `ingest`: endpoint parsing, codec negotiation, graph lifecycle, bus
//!   recovery
//! - `detect`: scheduling, preprocessing, inference backends, NMS, overlay
//! - `slot`: latest-wins handoff
//! - `perf`: rolling FPS and processing time
//! - `config`: TOML file plus environment overrides

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod perf;
pub mod slot;

pub use config::{AppConfig, DetectorSettings, ModelFormat, StreamSettings};
pub use detect::{DetectError, Detection, DetectionEngine, DetectionOutcome};
pub use frame::{Frame, FrameError, MappedSample, PixelLayout};
pub use ingest::{IngestError, IngestPipeline, IngestSettings, StreamEndpoint};
pub use perf::{PerfReadout, PerformanceCounters};
pub use slot::{latest_slot, Publish, SlotReceiver, SlotSender};
