//! Output decoding and non-maximum suppression.

use ndarray::Array2;

use super::preprocess::InferenceGeometry;
use super::result::{BoundingBox, Detection};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// Leading columns before the class scores: cx, cy, w, h, objectness.
const SCORE_OFFSET: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostprocessConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

impl PostprocessConfig {
    /// Decode every head, then suppress overlaps.
    pub fn run(&self, outputs: &[Array2<f32>], geometry: &InferenceGeometry) -> Vec<Detection> {
        let candidates = decode(outputs, geometry, self.confidence_threshold);
        nms(&candidates, self.confidence_threshold, self.nms_threshold)
            .into_iter()
            .map(|i| candidates[i])
            .collect()
    }
}

/// Turn raw rows into candidates in original-frame pixel coordinates.
///
/// A row is kept when its best class score is strictly above `threshold`.
/// Boxes are computed in inference-frame pixels (truncated to whole pixels),
/// multiplied by the geometry's scale factor, then clamped to the original
/// frame.
pub fn decode(outputs: &[Array2<f32>], geometry: &InferenceGeometry, threshold: f32) -> Vec<Detection> {
    let inf_w = geometry.width as f32;
    let inf_h = geometry.height as f32;
    let scale = geometry.scale_factor;
    let mut found = Vec::new();

    for output in outputs {
        if output.ncols() <= SCORE_OFFSET {
            continue;
        }
        for row in output.rows() {
            let mut class_id = 0;
            let mut best = f32::NEG_INFINITY;
            for (i, &score) in row.iter().skip(SCORE_OFFSET).enumerate() {
                if score > best {
                    best = score;
                    class_id = i;
                }
            }
            if !best.is_finite() || best <= threshold {
                continue;
            }

            // Truncating casts throughout.
            let center_x = (row[0] * inf_w) as i32;
            let center_y = (row[1] * inf_h) as i32;
            let width = (row[2] * inf_w) as i32;
            let height = (row[3] * inf_h) as i32;
            let left = center_x - width / 2;
            let top = center_y - height / 2;

            let rescale = |v: i32| (v as f32 * scale) as i32;
            let bbox = BoundingBox::new(rescale(left), rescale(top), rescale(width), rescale(height))
                .clamp_to(geometry.original_width, geometry.original_height);

            found.push(Detection {
                class_id,
                confidence: best,
                bbox,
            });
        }
    }
    found
}

/// Greedy NMS. Returns indices into `candidates`, highest score first.
///
/// Candidates at or below `score_threshold` are dropped. Equal scores keep
/// their input order. A box is suppressed when its IoU with an already kept
/// box exceeds `iou_threshold`.
pub fn nms(candidates: &[Detection], score_threshold: f32, iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].confidence > score_threshold)
        .collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .confidence
            .partial_cmp(&candidates[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<usize> = Vec::with_capacity(order.len());
    for i in order {
        let overlaps = kept
            .iter()
            .any(|&k| candidates[k].bbox.iou(&candidates[i].bbox) > iou_threshold);
        if !overlaps {
            kept.push(i);
        }
    }
    kept
}
