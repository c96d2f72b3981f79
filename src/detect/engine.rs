//! Background detection worker.
//!
//! Frames are handed over through a latest-wins slot, so a slow model only
//! ever sees the newest frame. Results go out through another latest-wins
//! slot. A panic while processing one frame drops that frame; the worker
//! keeps going.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::config::DetectorSettings;
use crate::frame::Frame;
use crate::perf::PerfReadout;
use crate::slot::{latest_slot, Publish, SlotReceiver, SlotSender};

use super::result::DetectionOutcome;
use super::scheduler::{Detector, FrameScheduler};
use super::DetectError;

const WORKER_POLL: Duration = Duration::from_millis(100);

/// Counters shared with the worker thread.
#[derive(Debug, Default)]
pub struct EngineStats {
    submitted: AtomicU64,
    replaced: AtomicU64,
    inferred: AtomicU64,
    passed_through: AtomicU64,
    dropped: AtomicU64,
}

impl EngineStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Frames overwritten in the input slot before the worker took them.
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }

    pub fn inferred(&self) -> u64 {
        self.inferred.load(Ordering::Relaxed)
    }

    pub fn passed_through(&self) -> u64 {
        self.passed_through.load(Ordering::Relaxed)
    }

    /// Frames lost to detection errors or panics.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Worker {
    input: SlotSender<Arc<Frame>>,
    results: SlotReceiver<DetectionOutcome>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    readout: PerfReadout,
}

pub struct DetectionEngine {
    worker: Option<Worker>,
    disabled_reason: Option<String>,
    stats: Arc<EngineStats>,
}

impl DetectionEngine {
    /// Load the model and start the worker. A load failure leaves the engine
    /// permanently disabled rather than failing the caller.
    pub fn from_settings(settings: &DetectorSettings) -> Self {
        if !settings.enabled {
            return Self::disabled("detection disabled by configuration");
        }
        match Detector::from_settings(settings) {
            Ok(detector) => match Self::spawn(FrameScheduler::new(detector, settings.skip_factor)) {
                Ok(engine) => engine,
                Err(e) => Self::disabled(format!("failed to start detection worker: {e}")),
            },
            Err(e) => {
                log::error!("failed to load detection model: {e}");
                Self::disabled(e.to_string())
            }
        }
    }

    pub fn spawn(scheduler: FrameScheduler) -> Result<Self, DetectError> {
        let (input, input_rx) = latest_slot::<Arc<Frame>>();
        let (results_tx, results) = latest_slot::<DetectionOutcome>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(EngineStats::default());
        let readout = scheduler.detector().readout();

        let handle = std::thread::Builder::new().name("detect".into()).spawn({
            let shutdown = Arc::clone(&shutdown);
            let stats = Arc::clone(&stats);
            move || run_worker(scheduler, input_rx, results_tx, shutdown, stats)
        })?;

        Ok(Self {
            worker: Some(Worker {
                input,
                results,
                shutdown,
                handle: Some(handle),
                readout,
            }),
            disabled_reason: None,
            stats,
        })
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        log::warn!("object detection unavailable: {reason}");
        Self {
            worker: None,
            disabled_reason: Some(reason),
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.worker.is_some()
    }

    /// Queue a frame, replacing any frame the worker has not taken yet.
    pub fn submit_frame(&self, frame: Arc<Frame>) -> Result<(), DetectError> {
        let Some(worker) = &self.worker else {
            return Err(DetectError::Unavailable(
                self.disabled_reason.clone().unwrap_or_default(),
            ));
        };
        match worker.input.publish(frame) {
            Publish::Delivered => {}
            Publish::Replaced => {
                self.stats.replaced.fetch_add(1, Ordering::Relaxed);
            }
            Publish::Closed => {
                return Err(DetectError::Unavailable("detection worker has exited".into()));
            }
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Receiver for processed frames. `None` when detection is unavailable.
    pub fn results(&self) -> Option<SlotReceiver<DetectionOutcome>> {
        self.worker.as_ref().map(|w| w.results.clone())
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn current_fps(&self) -> f32 {
        self.worker.as_ref().map_or(0.0, |w| w.readout.fps())
    }

    pub fn last_processing(&self) -> Duration {
        self.worker
            .as_ref()
            .map_or(Duration::ZERO, |w| w.readout.last_processing())
    }

    /// Stop the worker and wait for it. Further submissions are rejected.
    pub fn shutdown(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = worker.handle.take() {
            if handle.join().is_err() {
                log::error!("detection worker panicked on exit");
            }
        }
        self.disabled_reason = Some("detection engine shut down".into());
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    mut scheduler: FrameScheduler,
    input: SlotReceiver<Arc<Frame>>,
    results: SlotSender<DetectionOutcome>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<EngineStats>,
) {
    log::debug!("detection worker started");
    while !shutdown.load(Ordering::SeqCst) {
        let frame = match input.recv_timeout(WORKER_POLL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let sequence = frame.sequence();
        match panic::catch_unwind(AssertUnwindSafe(|| scheduler.on_frame(frame))) {
            Ok(Some(outcome)) => {
                let counter = if outcome.inferred {
                    &stats.inferred
                } else {
                    &stats.passed_through
                };
                counter.fetch_add(1, Ordering::Relaxed);
                let _ = results.publish(outcome);
            }
            Ok(None) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("detection panicked on frame {sequence}; frame dropped");
            }
        }
    }
    log::debug!("detection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::detect::catalog::ClassCatalog;
    use crate::detect::overlay::{DistanceFilter, OverlayRenderer};
    use crate::frame::PixelLayout;

    fn frame(seq: u64) -> Arc<Frame> {
        Arc::new(
            Frame::new(vec![0; 32 * 32 * 3], 32, 32, PixelLayout::Bgr8)
                .unwrap()
                .with_sequence(seq),
        )
    }

    fn engine(backend: StubBackend, skip: u32) -> DetectionEngine {
        let settings = DetectorSettings {
            input_size: 16,
            ..DetectorSettings::default()
        };
        let detector = Detector::new(
            Box::new(backend),
            ClassCatalog::from_names(["person"]),
            &settings,
            OverlayRenderer::new(None, DistanceFilter::All),
        );
        DetectionEngine::spawn(FrameScheduler::new(detector, skip)).unwrap()
    }

    fn next(rx: &SlotReceiver<DetectionOutcome>) -> DetectionOutcome {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn disabled_engine_rejects_frames() {
        let engine = DetectionEngine::disabled("model missing");
        assert!(!engine.is_available());
        assert!(engine.results().is_none());
        assert!(matches!(
            engine.submit_frame(frame(1)),
            Err(DetectError::Unavailable(reason)) if reason == "model missing"
        ));
    }

    #[test]
    fn frames_come_back_processed() {
        let engine = engine(StubBackend::empty(1), 1);
        let rx = engine.results().unwrap();
        engine.submit_frame(frame(3)).unwrap();
        let out = next(&rx);
        assert!(out.inferred);
        assert_eq!(out.frame.sequence(), 3);
    }

    #[test]
    fn worker_survives_a_panicking_frame() {
        let engine = engine(StubBackend::empty(1).panic_on(1), 1);
        let rx = engine.results().unwrap();
        engine.submit_frame(frame(1)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while engine.stats().dropped() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(engine.stats().dropped(), 1);
        engine.submit_frame(frame(2)).unwrap();
        assert_eq!(next(&rx).frame.sequence(), 2);
    }

    #[test]
    fn skip_counts_only_frames_the_worker_takes() {
        let engine = engine(StubBackend::empty(1), 2);
        for seq in 1..=50 {
            engine.submit_frame(frame(seq)).unwrap();
        }
        let stats = engine.stats();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let taken = || stats.inferred() + stats.passed_through() + stats.dropped();
        while taken() + stats.replaced() < stats.submitted() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stats.submitted(), 50);
        assert_eq!(taken() + stats.replaced(), 50);
        assert_eq!(stats.inferred(), taken() / 2);
    }

    #[test]
    fn shutdown_rejects_further_frames() {
        let mut engine = engine(StubBackend::empty(1), 1);
        engine.shutdown();
        engine.shutdown();
        assert!(matches!(
            engine.submit_frame(frame(1)),
            Err(DetectError::Unavailable(_))
        ));
    }

    #[test]
    fn disabled_by_configuration() {
        let settings = DetectorSettings {
            enabled: false,
            ..DetectorSettings::default()
        };
        assert!(!DetectionEngine::from_settings(&settings).is_available());
    }

    #[test]
    fn missing_model_files_disable_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DetectorSettings {
            class_names: dir.path().join("coco.names"),
            ..DetectorSettings::default()
        };
        let engine = DetectionEngine::from_settings(&settings);
        assert!(!engine.is_available());
    }
}
