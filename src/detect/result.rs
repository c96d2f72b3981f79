use std::sync::Arc;
use std::time::Duration;

use crate::frame::Frame;

/// Axis-aligned box in pixel coordinates of the original frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// Intersection over union; 0 when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.right().min(other.right()) - self.left.max(other.left)).max(0) as i64;
        let iy = (self.bottom().min(other.bottom()) - self.top.max(other.top)).max(0) as i64;
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }

    /// Clip to `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as i32, height as i32);
        let left = self.left.clamp(0, w);
        let top = self.top.clamp(0, h);
        let right = self.right().clamp(0, w);
        let bottom = self.bottom().clamp(0, h);
        BoundingBox::new(left, top, right - left, bottom - top)
    }
}

/// One detection surviving the confidence filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// What the engine hands back per submitted frame.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    /// Annotated copy, or the submitted frame itself on pass-through.
    pub frame: Arc<Frame>,
    pub detections: Vec<Detection>,
    /// False when the frame-skip policy forwarded the frame unchanged.
    pub inferred: bool,
    pub processing: Duration,
}
