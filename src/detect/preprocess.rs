//! Frame → network input tensor.
//!
//! Oversized frames are first shrunk to `max_width` (aspect preserved) and the
//! inverse ratio is reported as `scale_factor`. The tensor is then built from
//! a square resize of that inference frame. All buffers are reused.

use fast_image_resize as fr;
use ndarray::Array4;

use crate::frame::{Frame, PixelLayout};

use super::DetectError;

/// Geometry of the frame the network actually saw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InferenceGeometry {
    pub width: u32,
    pub height: u32,
    /// `original_width / width`; 1 when no downscale happened.
    pub scale_factor: f32,
    pub original_width: u32,
    pub original_height: u32,
}

pub struct Preprocessor {
    input_size: u32,
    max_width: u32,
    swap_rb: bool,
    resizer: fr::Resizer,
    scaled: Option<fr::images::Image<'static>>,
    square: fr::images::Image<'static>,
    tensor: Array4<f32>,
}

impl Preprocessor {
    pub fn new(input_size: u32, max_width: u32, swap_rb: bool) -> Self {
        let side = input_size as usize;
        Self {
            input_size,
            max_width,
            swap_rb,
            resizer: fr::Resizer::new(),
            scaled: None,
            square: fr::images::Image::new(input_size, input_size, fr::PixelType::U8x3),
            tensor: Array4::zeros((1, 3, side, side)),
        }
    }

    /// Downscale if needed, then fill the input tensor.
    pub fn prepare(&mut self, frame: &Frame) -> Result<(&Array4<f32>, InferenceGeometry), DetectError> {
        let (width, height) = (frame.width(), frame.height());
        let source = fr::images::ImageRef::new(width, height, frame.pixels(), fr::PixelType::U8x3)
            .map_err(|e| DetectError::Preprocess(e.to_string()))?;
        let bilinear = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));

        let geometry = if width > self.max_width {
            let scaled_w = self.max_width;
            let scaled_h = ((height as u64 * scaled_w as u64 + width as u64 / 2) / width as u64).max(1) as u32;
            let reuse = self
                .scaled
                .as_ref()
                .is_some_and(|img| img.width() == scaled_w && img.height() == scaled_h);
            if !reuse {
                self.scaled = Some(fr::images::Image::new(scaled_w, scaled_h, fr::PixelType::U8x3));
            }
            let Self {
                resizer,
                scaled,
                square,
                ..
            } = self;
            let scaled = scaled
                .as_mut()
                .ok_or_else(|| DetectError::Preprocess("scaled buffer missing".into()))?;
            resizer
                .resize(&source, &mut *scaled, &bilinear)
                .map_err(|e| DetectError::Preprocess(e.to_string()))?;
            resizer
                .resize(&*scaled, square, &bilinear)
                .map_err(|e| DetectError::Preprocess(e.to_string()))?;
            InferenceGeometry {
                width: scaled_w,
                height: scaled_h,
                scale_factor: width as f32 / scaled_w as f32,
                original_width: width,
                original_height: height,
            }
        } else {
            self.resizer
                .resize(&source, &mut self.square, &bilinear)
                .map_err(|e| DetectError::Preprocess(e.to_string()))?;
            InferenceGeometry {
                width,
                height,
                scale_factor: 1.0,
                original_width: width,
                original_height: height,
            }
        };

        self.fill_tensor(frame.layout());
        Ok((&self.tensor, geometry))
    }

    /// Planar NCHW, values in [0, 1], channel order RGB when `swap_rb` and the
    /// frame is BGR.
    fn fill_tensor(&mut self, layout: PixelLayout) {
        let plane = (self.input_size * self.input_size) as usize;
        // Source channel feeding each tensor plane.
        let order = match (layout, self.swap_rb) {
            (PixelLayout::Bgr8, true) | (PixelLayout::Rgb8, false) => [2, 1, 0],
            (PixelLayout::Bgr8, false) | (PixelLayout::Rgb8, true) => [0, 1, 2],
        };
        let pixels = self.square.buffer();
        let Some(tensor) = self.tensor.as_slice_mut() else {
            return;
        };
        for (i, px) in pixels.chunks_exact(3).enumerate() {
            for (c, &src) in order.iter().enumerate() {
                tensor[c * plane + i] = px[src] as f32 / 255.0;
            }
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}
