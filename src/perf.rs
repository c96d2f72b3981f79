//! Rolling per-stage performance counters.
//!
//! Each counter is owned by the thread that drives its stage. Other threads
//! only read the published snapshot through `PerfReadout`, which stores plain
//! atomics; a torn read of fps against processing time is acceptable.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ROLLOVER: Duration = Duration::from_millis(1000);

#[derive(Debug)]
pub struct PerformanceCounters {
    frame_count: u32,
    window_start: Instant,
    fps: f32,
    last_processing: Duration,
    readout: PerfReadout,
}

impl PerformanceCounters {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            frame_count: 0,
            window_start: now,
            fps: 0.0,
            last_processing: Duration::ZERO,
            readout: PerfReadout::default(),
        }
    }

    /// Fresh counters publishing into an existing readout.
    pub fn with_readout(readout: PerfReadout) -> Self {
        Self {
            readout,
            ..Self::new()
        }
    }

    /// Count one frame. Returns the new fps when a window rolled over.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frame_count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < ROLLOVER {
            return None;
        }
        let elapsed_ms = elapsed.as_millis().max(1) as f32;
        self.fps = self.frame_count as f32 * 1000.0 / elapsed_ms;
        self.frame_count = 0;
        self.window_start = now;
        self.readout.store_fps(self.fps);
        Some(self.fps)
    }

    pub fn record_processing(&mut self, took: Duration) {
        self.last_processing = took;
        self.readout.store_processing(took);
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn last_processing(&self) -> Duration {
        self.last_processing
    }

    /// Shared read-only view for other threads.
    pub fn readout(&self) -> PerfReadout {
        self.readout.clone()
    }
}

impl Default for PerformanceCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PerfReadout {
    fps_bits: Arc<AtomicU32>,
    processing_us: Arc<AtomicU64>,
}

impl PerfReadout {
    fn store_fps(&self, fps: f32) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    fn store_processing(&self, took: Duration) {
        self.processing_us
            .store(took.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f32 {
        f32::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn last_processing(&self) -> Duration {
        Duration::from_micros(self.processing_us.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_computed_on_rollover() {
        let start = Instant::now();
        let mut counters = PerformanceCounters::starting_at(start);
        for i in 1..30 {
            assert_eq!(counters.tick(start + Duration::from_millis(i * 30)), None);
        }
        let fps = counters.tick(start + Duration::from_millis(1500)).unwrap();
        assert!((fps - 20.0).abs() < f32::EPSILON);
        assert!((counters.readout().fps() - 20.0).abs() < f32::EPSILON);
    }

    #[test]
    fn window_resets_after_rollover() {
        let start = Instant::now();
        let mut counters = PerformanceCounters::starting_at(start);
        counters.tick(start + Duration::from_millis(1000));
        assert_eq!(counters.tick(start + Duration::from_millis(1500)), None);
        let fps = counters.tick(start + Duration::from_millis(2000)).unwrap();
        assert!((fps - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn processing_time_is_visible_to_readers() {
        let mut counters = PerformanceCounters::new();
        let readout = counters.readout();
        counters.record_processing(Duration::from_millis(42));
        assert_eq!(readout.last_processing(), Duration::from_millis(42));
    }
}
