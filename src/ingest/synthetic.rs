//! In-process synthetic graph for `stub://` endpoints.
//!
//! Behaves like a live source: branches are exposed when the graph reaches
//! Playing, frames arrive on a producer thread at the configured rate and
//! failures are injected through the URL query:
//!
//! `stub://name?encoding=H264&width=320&height=240&fps=25&audio=1&caps=1`
//! `&error_after=N&eos_after=N&warn_after=N&fail_element=avdec_h264&bounce_fails=1`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::frame::{MappedSample, PixelLayout};

use super::bus::BusEvent;
use super::endpoint::StreamEndpoint;
use super::graph::PipelineState;
use super::negotiate::{DecodeChain, PadCaps};
use super::session::{BranchOutcome, Session};
use super::IngestError;

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_FPS: u32 = 25;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SyntheticOptions {
    pub encoding: String,
    pub audio: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Whether pad caps carry size and rate; otherwise they come from samples.
    pub pad_caps: bool,
    pub error_after: Option<u64>,
    pub eos_after: Option<u64>,
    pub warn_after: Option<u64>,
    pub fail_element: Option<String>,
    pub bounce_fails: bool,
}

impl SyntheticOptions {
    pub fn from_endpoint(endpoint: &StreamEndpoint) -> Result<Self, IngestError> {
        let number = |key: &str| -> Result<Option<u64>, IngestError> {
            endpoint
                .query(key)
                .map(|raw| {
                    raw.parse::<u64>().map_err(|_| IngestError::InvalidEndpoint {
                        url: endpoint.as_str().to_string(),
                        reason: format!("{key} must be an integer"),
                    })
                })
                .transpose()
        };
        let flag = |key: &str| {
            endpoint
                .query(key)
                .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        };

        let dimension = |key: &str, default: u32| -> Result<u32, IngestError> {
            let value = number(key)?.unwrap_or(default as u64);
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| IngestError::InvalidEndpoint {
                    url: endpoint.as_str().to_string(),
                    reason: format!("{key} must be a positive 32-bit integer"),
                })
        };

        Ok(Self {
            encoding: endpoint.query("encoding").unwrap_or_else(|| "H264".to_string()),
            audio: flag("audio"),
            width: dimension("width", DEFAULT_WIDTH)?,
            height: dimension("height", DEFAULT_HEIGHT)?,
            fps: dimension("fps", DEFAULT_FPS)?,
            pad_caps: endpoint.query("caps").map_or(true, |v| v != "0"),
            error_after: number("error_after")?,
            eos_after: number("eos_after")?,
            warn_after: number("warn_after")?,
            fail_element: endpoint.query("fail_element"),
            bounce_fails: flag("bounce_fails"),
        })
    }

    fn video_caps(&self) -> PadCaps {
        let caps = PadCaps::video(&self.encoding);
        if self.pad_caps {
            caps.with_size(self.width as i32, self.height as i32)
                .with_framerate(self.fps as i32, 1)
        } else {
            caps
        }
    }
}

/// Shared between the graph and the pipeline's stop path.
#[derive(Clone, Default)]
pub(crate) struct SyntheticControl {
    producing: Arc<AtomicBool>,
    state: Arc<Mutex<PipelineState>>,
}

impl SyntheticControl {
    pub fn force_null(&self) {
        self.producing.store(false, Ordering::Release);
        *self.state.lock() = PipelineState::Null;
    }
}

pub(crate) struct SyntheticGraph {
    options: SyntheticOptions,
    session: Arc<Session>,
    control: SyntheticControl,
    events_tx: Sender<BusEvent>,
    events_rx: Receiver<BusEvent>,
    producer: Mutex<Option<JoinHandle<()>>>,
    frames_total: Arc<AtomicU64>,
    times_played: AtomicU64,
}

impl SyntheticGraph {
    pub fn build(endpoint: &StreamEndpoint, session: Arc<Session>) -> Result<Self, IngestError> {
        let options = SyntheticOptions::from_endpoint(endpoint)?;
        // Skeleton elements are always available; only chain elements can fail.
        let (events_tx, events_rx) = unbounded();
        log::info!("[{}] synthetic graph built ({}x{} @ {} fps)", session.tag(), options.width, options.height, options.fps);
        Ok(Self {
            options,
            session,
            control: SyntheticControl::default(),
            events_tx,
            events_rx,
            producer: Mutex::new(None),
            frames_total: Arc::new(AtomicU64::new(0)),
            times_played: AtomicU64::new(0),
        })
    }

    pub fn control(&self) -> SyntheticControl {
        self.control.clone()
    }

    pub fn set_state(&self, target: PipelineState) -> Result<(), IngestError> {
        let old = *self.control.state.lock();
        if old == target {
            return Ok(());
        }
        if !old.can_transition_to(target) {
            return Err(IngestError::StateChange { target });
        }
        match target {
            PipelineState::Playing => self.play()?,
            _ => self.halt(),
        }
        *self.control.state.lock() = target;
        let _ = self.events_tx.send(BusEvent::StateChanged {
            old,
            new: target,
            pending: PipelineState::Null,
            top_level: true,
        });
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        *self.control.state.lock()
    }

    pub fn next_event(&self, timeout: Duration) -> Option<BusEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    pub fn negotiated_caps(&self) -> Option<String> {
        let params = self.session.params().snapshot()?;
        Some(format!(
            "video/x-raw, format=BGR, width={}, height={}, framerate={}/1",
            params.width, params.height, params.fps
        ))
    }

    fn play(&self) -> Result<(), IngestError> {
        let played = self.times_played.fetch_add(1, Ordering::AcqRel);
        if played > 0 && self.options.bounce_fails {
            return Err(IngestError::StateChange {
                target: PipelineState::Playing,
            });
        }
        self.expose_branches()?;
        self.start_producer()
    }

    fn expose_branches(&self) -> Result<(), IngestError> {
        if self.options.audio {
            self.session
                .on_new_branch(&PadCaps::audio("PCMU"), |_| Ok(()))?;
        }
        let fail = self.options.fail_element.as_deref();
        let outcome = self
            .session
            .on_new_branch(&self.options.video_caps(), |chain: DecodeChain| {
                match chain.factories().into_iter().find(|f| Some(*f) == fail) {
                    Some(factory) => Err(IngestError::ElementMissing {
                        factory: factory.to_string(),
                    }),
                    None => Ok(()),
                }
            });
        match outcome {
            Ok(BranchOutcome::Attached(_)) | Ok(BranchOutcome::AlreadyAttached(_)) => Ok(()),
            Ok(BranchOutcome::Ignored) => Ok(()),
            Err(e) => {
                // Branch abandoned; the graph keeps playing without video.
                log::error!("[{}] video branch abandoned: {e}", self.session.tag());
                Ok(())
            }
        }
    }

    fn start_producer(&self) -> Result<(), IngestError> {
        self.halt();
        if self.session.graph().chain().is_none() {
            log::warn!("[{}] no video branch linked", self.session.tag());
            return Ok(());
        }
        self.control.producing.store(true, Ordering::Release);

        let producer = Producer {
            options: self.options.clone(),
            session: Arc::clone(&self.session),
            producing: Arc::clone(&self.control.producing),
            events: self.events_tx.clone(),
            frames_total: Arc::clone(&self.frames_total),
        };
        let handle = std::thread::Builder::new()
            .name("stub-producer".into())
            .spawn(move || producer.run())?;
        *self.producer.lock() = Some(handle);
        Ok(())
    }

    fn halt(&self) {
        self.control.producing.store(false, Ordering::Release);
        if let Some(handle) = self.producer.lock().take() {
            if handle.join().is_err() {
                log::error!("[{}] synthetic producer panicked", self.session.tag());
            }
        }
    }
}

impl Drop for SyntheticGraph {
    fn drop(&mut self) {
        self.halt();
    }
}

struct Producer {
    options: SyntheticOptions,
    session: Arc<Session>,
    producing: Arc<AtomicBool>,
    events: Sender<BusEvent>,
    frames_total: Arc<AtomicU64>,
}

impl Producer {
    fn run(self) {
        let mut extractor = self.session.extractor();
        let interval = Duration::from_secs_f64(1.0 / self.options.fps as f64);
        let row_bytes = self.options.width as usize * 3;
        // Decoders pad rows to 4 bytes; mimic that so repacking is exercised.
        let stride = (row_bytes + 3) & !3;
        let mut buffer = vec![0u8; stride * self.options.height as usize];

        while self.producing.load(Ordering::Acquire) {
            std::thread::sleep(interval);
            if !self.producing.load(Ordering::Acquire) {
                break;
            }
            let n = self.frames_total.fetch_add(1, Ordering::AcqRel) + 1;
            paint(&mut buffer, stride, row_bytes, n);
            let sample = MappedSample {
                data: &buffer,
                width: Some(self.options.width as i32),
                height: Some(self.options.height as i32),
                stride: Some(stride),
                layout: PixelLayout::Bgr8,
            };
            if let Err(e) = extractor.extract(&sample, Some(self.options.fps)) {
                log::warn!("[{}] dropped frame: {e}", self.session.tag());
            }

            if self.options.warn_after == Some(n) {
                let _ = self.events.send(BusEvent::Warning {
                    source: "source".into(),
                    message: "synthetic jitter".into(),
                    debug: None,
                });
            }
            if self.options.error_after == Some(n) {
                let _ = self.events.send(BusEvent::Error {
                    source: "source".into(),
                    message: "Could not read from resource.".into(),
                    debug: Some("synthetic transport failure".into()),
                });
                break;
            }
            if self.options.eos_after == Some(n) {
                let _ = self.events.send(BusEvent::Eos);
                break;
            }
        }
    }
}

/// Horizontal gradient that shifts every frame.
fn paint(buffer: &mut [u8], stride: usize, row_bytes: usize, n: u64) {
    for (y, row) in buffer.chunks_mut(stride).enumerate() {
        for (x, px) in row[..row_bytes].chunks_exact_mut(3).enumerate() {
            let v = (x as u64 + n) as u8;
            px[0] = v;
            px[1] = y as u8;
            px[2] = 255 - v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_come_from_the_query() {
        let endpoint =
            StreamEndpoint::parse("stub://cam?encoding=H265&width=64&height=48&caps=0&error_after=5")
                .unwrap();
        let options = SyntheticOptions::from_endpoint(&endpoint).unwrap();
        assert_eq!(options.encoding, "H265");
        assert_eq!((options.width, options.height, options.fps), (64, 48, 25));
        assert!(!options.pad_caps);
        assert_eq!(options.error_after, Some(5));
        assert_eq!(options.video_caps().width, None);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let endpoint = StreamEndpoint::parse("stub://cam?width=wide").unwrap();
        assert!(SyntheticOptions::from_endpoint(&endpoint).is_err());
        let zero = StreamEndpoint::parse("stub://cam?fps=0").unwrap();
        assert!(SyntheticOptions::from_endpoint(&zero).is_err());
    }

    #[test]
    fn paint_leaves_padding_alone() {
        let mut buffer = vec![0xEEu8; 8 * 2];
        paint(&mut buffer, 8, 6, 1);
        assert_eq!(&buffer[6..8], &[0xEE, 0xEE]);
        assert_eq!(buffer[0], 1);
    }
}
