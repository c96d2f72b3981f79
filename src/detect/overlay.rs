//! Annotation of processed frames: boxes, labels, distance and the
//! performance panel.
//!
//! Drawing happens on a working copy so the published input frame is never
//! touched. Colors are given as BGR triples and mapped to the frame layout.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ab_glyph::{FontVec, PxScale};
use image::{ImageBuffer, Rgb};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::frame::{Frame, PixelLayout};

use super::catalog::ClassCatalog;
use super::result::Detection;
use super::DetectError;

/// Box colors by `class_id % 5`, BGR.
pub const PALETTE: [[u8; 3]; 5] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
];

const WHITE: [u8; 3] = [255, 255, 255];
const BLACK: [u8; 3] = [0, 0, 0];
const PANEL_TEXT: [u8; 3] = [0, 255, 255];

const LABEL_SCALE: f32 = 14.0;
const PANEL_SCALE: f32 = 16.0;
const LABEL_BASELINE: i32 = 4;
const LABEL_LIFT: i32 = 10;

/// Pinhole constants: assumed real width (m) times focal length (px).
const REAL_WIDTH_M: f32 = 0.60;
const FOCAL_LENGTH_PX: f32 = 615.0;

const FONT_FALLBACKS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

type Canvas = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Estimated distance in meters for a box of `box_width` pixels.
pub fn estimate_distance(box_width: i32) -> Option<f32> {
    if box_width <= 0 {
        return None;
    }
    Some(REAL_WIDTH_M * FOCAL_LENGTH_PX / box_width as f32)
}

/// `"{name}: {pct}% "` plus `"dist: {d:.2}m"` when a distance is known.
pub fn label_text(name: &str, confidence: f32, distance: Option<f32>) -> String {
    let mut label = format!("{name}: {}% ", (confidence * 100.0) as i32);
    if let Some(d) = distance.filter(|d| *d > 0.0) {
        label.push_str(&format!("dist: {d:.2}m"));
    }
    label
}

/// Which classes get a distance estimate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DistanceFilter {
    #[default]
    All,
    Only(HashSet<usize>),
}

impl DistanceFilter {
    /// Resolve class names against the catalog. Unknown names are logged and
    /// ignored; an empty list means every class.
    pub fn from_names(names: &[String], catalog: &ClassCatalog) -> Self {
        if names.is_empty() {
            return Self::All;
        }
        let ids = names
            .iter()
            .filter_map(|name| {
                let id = catalog.position(name);
                if id.is_none() {
                    log::warn!("distance class {name:?} is not in the class list");
                }
                id
            })
            .collect();
        Self::Only(ids)
    }

    pub fn applies(&self, class_id: usize) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&class_id),
        }
    }
}

/// Numbers shown in the top-left panel.
#[derive(Clone, Copy, Debug)]
pub struct PanelStats {
    pub fps: f32,
    pub processing: Duration,
    pub width: u32,
    pub height: u32,
}

pub struct OverlayRenderer {
    font: Option<FontVec>,
    distance: DistanceFilter,
    warned_no_font: AtomicBool,
}

impl OverlayRenderer {
    pub fn new(font: Option<FontVec>, distance: DistanceFilter) -> Self {
        Self {
            font,
            distance,
            warned_no_font: AtomicBool::new(false),
        }
    }

    /// Load `preferred`, or the first system font that exists.
    pub fn load_font(preferred: Option<&Path>) -> Option<FontVec> {
        let candidates = preferred
            .map(Path::to_path_buf)
            .into_iter()
            .chain(FONT_FALLBACKS.iter().map(PathBuf::from));
        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    log::debug!("overlay font: {}", path.display());
                    return Some(font);
                }
                Err(e) => log::warn!("unusable font {}: {e}", path.display()),
            }
        }
        None
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Annotated copy of `frame`.
    pub fn render(
        &self,
        frame: &Frame,
        detections: &[Detection],
        catalog: &ClassCatalog,
        stats: &PanelStats,
    ) -> Result<Frame, DetectError> {
        let layout = frame.layout();
        let mut canvas = Canvas::from_raw(frame.width(), frame.height(), frame.working_copy())
            .ok_or_else(|| DetectError::Preprocess("frame buffer does not match its size".into()))?;
        if self.font.is_none() && !self.warned_no_font.swap(true, Ordering::Relaxed) {
            log::warn!("no overlay font available; labels and panel text are skipped");
        }

        for det in detections {
            self.draw_detection(&mut canvas, layout, det, catalog);
        }
        self.draw_panel(&mut canvas, layout, stats);

        Ok(frame.derive(canvas.into_raw())?)
    }

    /// Classes outside the catalog are not drawn.
    fn draw_detection(&self, canvas: &mut Canvas, layout: PixelLayout, det: &Detection, catalog: &ClassCatalog) {
        let Some(name) = catalog.get(det.class_id) else {
            log::debug!("class {} is outside the class list; skipped", det.class_id);
            return;
        };
        let color = paint(PALETTE[det.class_id % PALETTE.len()], layout);
        let b = det.bbox;
        if b.width > 0 && b.height > 0 {
            draw_hollow_rect_mut(canvas, Rect::at(b.left, b.top).of_size(b.width as u32, b.height as u32), color);
            if b.width > 2 && b.height > 2 {
                draw_hollow_rect_mut(
                    canvas,
                    Rect::at(b.left + 1, b.top + 1).of_size(b.width as u32 - 2, b.height as u32 - 2),
                    color,
                );
            }
        }

        let Some(font) = &self.font else {
            return;
        };
        let distance = if self.distance.applies(det.class_id) {
            estimate_distance(b.width)
        } else {
            None
        };
        let label = label_text(name, det.confidence, distance);
        let scale = PxScale::from(LABEL_SCALE);
        let (text_w, text_h) = text_size(scale, font, &label);
        let text_h = text_h as i32;

        let label_top = b.top.max(text_h);
        let bg_top = label_top - text_h - LABEL_LIFT;
        if text_w > 0 {
            draw_filled_rect_mut(
                canvas,
                Rect::at(b.left, bg_top).of_size(text_w, (text_h + LABEL_BASELINE) as u32),
                color,
            );
        }
        draw_text_mut(canvas, paint(WHITE, layout), b.left, bg_top, scale, font, &label);
    }

    fn draw_panel(&self, canvas: &mut Canvas, layout: PixelLayout, stats: &PanelStats) {
        draw_filled_rect_mut(canvas, Rect::at(10, 10).of_size(150, 70), paint(BLACK, layout));
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(PANEL_SCALE);
        let lines = [
            format!("FPS: {}", stats.fps as i32),
            format!("Time: {:.3}s", stats.processing.as_secs_f64()),
            format!("Size: {}x{}", stats.width, stats.height),
        ];
        for (line, baseline) in lines.iter().zip([30, 50, 70]) {
            let (_, h) = text_size(scale, font, line);
            draw_text_mut(canvas, paint(PANEL_TEXT, layout), 15, baseline - h as i32, scale, font, line);
        }
    }
}

/// Pixel value for a BGR color in the given layout.
fn paint(bgr: [u8; 3], layout: PixelLayout) -> Rgb<u8> {
    match layout {
        PixelLayout::Bgr8 => Rgb(bgr),
        PixelLayout::Rgb8 => Rgb([bgr[2], bgr[1], bgr[0]]),
    }
}
