//! Frame-skip policy and the per-frame detection step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DetectorSettings;
use crate::frame::Frame;
use crate::perf::{PerfReadout, PerformanceCounters};

use super::backend::InferenceBackend;
use super::backends::load_backend;
use super::catalog::ClassCatalog;
use super::overlay::{DistanceFilter, OverlayRenderer, PanelStats};
use super::postprocess::PostprocessConfig;
use super::preprocess::Preprocessor;
use super::result::DetectionOutcome;
use super::DetectError;

/// Preprocess, forward, decode, suppress, annotate.
pub struct Detector {
    backend: Box<dyn InferenceBackend>,
    catalog: ClassCatalog,
    preprocessor: Preprocessor,
    post: PostprocessConfig,
    overlay: OverlayRenderer,
    counters: PerformanceCounters,
}

impl Detector {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        catalog: ClassCatalog,
        settings: &DetectorSettings,
        overlay: OverlayRenderer,
    ) -> Self {
        Self {
            backend,
            catalog,
            preprocessor: Preprocessor::new(
                settings.input_size,
                settings.max_processing_width,
                settings.swap_rb,
            ),
            post: PostprocessConfig {
                confidence_threshold: settings.confidence_threshold,
                nms_threshold: settings.nms_threshold,
            },
            overlay,
            counters: PerformanceCounters::new(),
        }
    }

    /// Load network, class list and font. Any failure here disables detection.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self, DetectError> {
        let catalog = ClassCatalog::load(&settings.class_names)?;
        let mut backend = load_backend(settings)?;
        backend.warm_up()?;
        log::info!(
            "detector ready: backend={} classes={} outputs={:?}",
            backend.name(),
            catalog.len(),
            backend.output_names()
        );
        let font = OverlayRenderer::load_font(settings.font.as_deref());
        let distance = DistanceFilter::from_names(&settings.distance_classes, &catalog);
        Ok(Self::new(
            backend,
            catalog,
            settings,
            OverlayRenderer::new(font, distance),
        ))
    }

    pub fn readout(&self) -> PerfReadout {
        self.counters.readout()
    }

    pub fn process(&mut self, frame: &Arc<Frame>) -> Result<DetectionOutcome, DetectError> {
        let started = Instant::now();
        let (tensor, geometry) = self.preprocessor.prepare(frame)?;
        let outputs = self.backend.forward(tensor)?;
        if outputs.is_empty() {
            return Err(DetectError::EmptyOutput);
        }
        let detections = self.post.run(&outputs, &geometry);

        self.counters.tick(Instant::now());
        let stats = PanelStats {
            fps: self.counters.fps(),
            processing: started.elapsed(),
            width: frame.width(),
            height: frame.height(),
        };
        let annotated = self
            .overlay
            .render(frame, &detections, &self.catalog, &stats)?;
        let processing = started.elapsed();
        self.counters.record_processing(processing);

        Ok(DetectionOutcome {
            frame: Arc::new(annotated),
            detections,
            inferred: true,
            processing,
        })
    }
}

/// Runs the detector on every `skip_factor`-th frame and forwards the rest
/// untouched.
///
/// Counting covers frames that reach the scheduler. Frames replaced in the
/// engine's latest-wins input slot before the worker picks them up are never
/// seen here, so under load the ratio is relative to delivered frames, not
/// submitted ones.
pub struct FrameScheduler {
    counter: u64,
    skip_factor: u64,
    detector: Detector,
}

impl FrameScheduler {
    pub fn new(detector: Detector, skip_factor: u32) -> Self {
        Self {
            counter: 0,
            skip_factor: u64::from(skip_factor.max(1)),
            detector,
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// `None` when detection failed; that frame is dropped.
    pub fn on_frame(&mut self, frame: Arc<Frame>) -> Option<DetectionOutcome> {
        self.counter += 1;
        if self.counter % self.skip_factor != 0 {
            return Some(DetectionOutcome {
                frame,
                detections: Vec::new(),
                inferred: false,
                processing: Duration::ZERO,
            });
        }
        match self.detector.process(&frame) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::warn!("detection failed on frame {}: {e}", frame.sequence());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::frame::PixelLayout;
    use ndarray::array;
    use std::sync::atomic::Ordering;

    fn frame(seq: u64) -> Arc<Frame> {
        Arc::new(
            Frame::new(vec![0; 64 * 48 * 3], 64, 48, PixelLayout::Bgr8)
                .unwrap()
                .with_sequence(seq),
        )
    }

    fn settings() -> DetectorSettings {
        DetectorSettings {
            input_size: 32,
            ..DetectorSettings::default()
        }
    }

    fn detector(backend: StubBackend) -> Detector {
        Detector::new(
            Box::new(backend),
            ClassCatalog::from_names(["person", "car"]),
            &settings(),
            OverlayRenderer::new(None, DistanceFilter::All),
        )
    }

    #[test]
    fn one_in_n_frames_reaches_inference() {
        let backend = StubBackend::empty(2);
        let calls = backend.calls();
        let mut scheduler = FrameScheduler::new(detector(backend), 3);
        let inferred: Vec<bool> = (1..=9)
            .map(|i| scheduler.on_frame(frame(i)).unwrap().inferred)
            .collect();
        assert_eq!(
            inferred,
            [false, false, true, false, false, true, false, false, true]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn skip_factor_one_infers_every_frame() {
        let backend = StubBackend::empty(2);
        let calls = backend.calls();
        let mut scheduler = FrameScheduler::new(detector(backend), 1);
        for i in 0..5 {
            assert!(scheduler.on_frame(frame(i)).unwrap().inferred);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn pass_through_returns_the_same_frame() {
        let mut scheduler = FrameScheduler::new(detector(StubBackend::empty(2)), 2);
        let input = frame(1);
        let out = scheduler.on_frame(Arc::clone(&input)).unwrap();
        assert!(Arc::ptr_eq(&out.frame, &input));
        assert!(out.detections.is_empty());
    }

    #[test]
    fn detections_come_back_in_frame_coordinates() {
        let head = array![[0.5, 0.5, 0.25, 0.25, 1.0, 0.1, 0.9]];
        let mut scheduler = FrameScheduler::new(detector(StubBackend::new(vec![head])), 1);
        let out = scheduler.on_frame(frame(7)).unwrap();
        assert_eq!(out.detections.len(), 1);
        let det = out.detections[0];
        assert_eq!(det.class_id, 1);
        assert_eq!((det.bbox.width, det.bbox.height), (16, 12));
        assert_eq!(out.frame.sequence(), 7);
    }

    #[test]
    fn failed_frames_are_dropped() {
        let mut scheduler = FrameScheduler::new(detector(StubBackend::empty(2).fail_on(1)), 1);
        assert!(scheduler.on_frame(frame(1)).is_none());
        assert!(scheduler.on_frame(frame(2)).is_some());
    }

    #[test]
    fn empty_output_is_an_error() {
        let mut det = detector(StubBackend::new(Vec::new()));
        assert!(matches!(det.process(&frame(1)), Err(DetectError::EmptyOutput)));
    }
}
