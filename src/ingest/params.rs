//! Write-once video parameters shared between the driving thread and readers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::negotiate::PadCaps;

/// Reported when the framerate fraction has a zero denominator.
pub const FALLBACK_FPS: u32 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Width, height and frame rate discovered during negotiation.
///
/// Values may be observed piecemeal; once all three are known the `detected`
/// flag is published with release ordering and nothing changes afterwards.
#[derive(Debug, Default)]
pub struct VideoParameters {
    width: AtomicU32,
    height: AtomicU32,
    fps: AtomicU32,
    detected: AtomicBool,
}

impl VideoParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::Acquire)
    }

    /// Record whatever the caps carry. Returns true if this call latched.
    pub fn observe(&self, caps: &PadCaps) -> bool {
        let fps = caps.framerate.and_then(|(num, den)| fps_from_fraction(num, den));
        self.observe_values(caps.width, caps.height, fps)
    }

    /// Like [`observe`](Self::observe) for values read off a decoded sample.
    pub fn observe_values(&self, width: Option<i32>, height: Option<i32>, fps: Option<u32>) -> bool {
        if self.is_detected() {
            return false;
        }
        if let Some(width) = width.filter(|w| *w > 0) {
            self.width.store(width as u32, Ordering::Relaxed);
        }
        if let Some(height) = height.filter(|h| *h > 0) {
            self.height.store(height as u32, Ordering::Relaxed);
        }
        if let Some(fps) = fps.filter(|f| *f > 0) {
            self.fps.store(fps, Ordering::Relaxed);
        }
        self.latch_if_complete()
    }

    /// Set `detected` once all three values are non-zero.
    pub fn latch_if_complete(&self) -> bool {
        let complete = self.width.load(Ordering::Relaxed) > 0
            && self.height.load(Ordering::Relaxed) > 0
            && self.fps.load(Ordering::Relaxed) > 0;
        complete
            && self
                .detected
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Latched values, or `None` before detection.
    pub fn snapshot(&self) -> Option<VideoParams> {
        if !self.is_detected() {
            return None;
        }
        Some(VideoParams {
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            fps: self.fps.load(Ordering::Relaxed),
        })
    }
}

/// Integer frame rate from a caps fraction.
pub fn fps_from_fraction(num: i32, den: i32) -> Option<u32> {
    if num <= 0 {
        return None;
    }
    if den == 0 {
        return Some(FALLBACK_FPS);
    }
    u32::try_from(num / den).ok().filter(|fps| *fps > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latches_once_complete() {
        let params = VideoParameters::new();
        assert!(!params.observe(&PadCaps::video("H264").with_size(1280, 720)));
        assert!(!params.is_detected());
        assert!(params.observe(&PadCaps::video("H264").with_framerate(30, 1)));
        assert_eq!(
            params.snapshot(),
            Some(VideoParams {
                width: 1280,
                height: 720,
                fps: 30
            })
        );
    }

    #[test]
    fn latched_values_are_never_overwritten() {
        let params = VideoParameters::new();
        params.observe(
            &PadCaps::video("H264")
                .with_size(640, 480)
                .with_framerate(15, 1),
        );
        assert!(!params.observe(
            &PadCaps::video("H265")
                .with_size(1920, 1080)
                .with_framerate(60, 1)
        ));
        assert_eq!(params.snapshot().map(|p| p.width), Some(640));
        assert_eq!(params.snapshot().map(|p| p.fps), Some(15));
    }

    #[test]
    fn zero_denominator_reports_fallback_rate() {
        assert_eq!(fps_from_fraction(30, 0), Some(FALLBACK_FPS));
        assert_eq!(fps_from_fraction(30000, 1001), Some(29));
        assert_eq!(fps_from_fraction(0, 1), None);
    }
}
