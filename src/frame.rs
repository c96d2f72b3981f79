//! Owned decoded frames.
//!
//! - `Frame`: contiguous, immutable image published across thread boundaries.
//! - `MappedSample`: borrowed view over a decoder buffer that is only valid while
//!   the buffer is mapped. `Frame::from_mapped` is the single copy out of it.
//!
//! Frames are shared as `Arc<Frame>` once published. Nothing hands out `&mut`
//! access to pixels; the overlay step draws on its own working copy.

use std::time::Instant;

/// Bytes per pixel for every layout the sink negotiates.
const BYTES_PER_PIXEL: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("sample caps carry no width/height")]
    MissingDimensions,

    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    #[error("stride {stride} is smaller than a {row_bytes}-byte row")]
    InvalidStride { stride: usize, row_bytes: usize },

    #[error("buffer holds {actual} bytes, {expected} required")]
    ShortBuffer { expected: usize, actual: usize },
}

/// Channel order of a packed 8-bit, 3-channel image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelLayout {
    #[default]
    Bgr8,
    Rgb8,
}

impl PixelLayout {
    /// Parse a raw-video caps `format` string.
    pub fn from_caps_format(format: &str) -> Option<Self> {
        match format {
            "BGR" => Some(Self::Bgr8),
            "RGB" => Some(Self::Rgb8),
            _ => None,
        }
    }

    pub fn caps_format(self) -> &'static str {
        match self {
            Self::Bgr8 => "BGR",
            Self::Rgb8 => "RGB",
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        BYTES_PER_PIXEL
    }
}

/// Borrowed view over a mapped decoder buffer plus what its caps said.
///
/// Width and height stay optional because the caps may not carry them; in that
/// case extraction fails for this frame only.
#[derive(Clone, Copy, Debug)]
pub struct MappedSample<'a> {
    pub data: &'a [u8],
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Row stride in bytes. `None` means tightly packed.
    pub stride: Option<usize>,
    pub layout: PixelLayout,
}

/// An owned, contiguous image.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    layout: PixelLayout,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an already packed buffer.
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions {
                width: width as i64,
                height: height as i64,
            });
        }
        let expected = packed_len(width, height, layout);
        if data.len() != expected {
            return Err(FrameError::ShortBuffer {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    /// Deep-copy a mapped sample into an owned frame.
    ///
    /// Padded rows are repacked; a tightly packed buffer is copied in one go.
    pub fn from_mapped(sample: &MappedSample<'_>) -> Result<Self, FrameError> {
        let (Some(width), Some(height)) = (sample.width, sample.height) else {
            return Err(FrameError::MissingDimensions);
        };
        if width <= 0 || height <= 0 {
            return Err(FrameError::InvalidDimensions {
                width: width as i64,
                height: height as i64,
            });
        }
        let (width, height) = (width as u32, height as u32);
        let row_bytes = width as usize * sample.layout.bytes_per_pixel();
        let stride = sample.stride.unwrap_or(row_bytes);
        if stride < row_bytes {
            return Err(FrameError::InvalidStride { stride, row_bytes });
        }

        let rows = height as usize;
        let needed = stride * (rows - 1) + row_bytes;
        if sample.data.len() < needed {
            return Err(FrameError::ShortBuffer {
                expected: needed,
                actual: sample.data.len(),
            });
        }

        let data = if stride == row_bytes {
            sample.data[..row_bytes * rows].to_vec()
        } else {
            let mut packed = Vec::with_capacity(row_bytes * rows);
            for row in sample.data.chunks(stride).take(rows) {
                packed.extend_from_slice(&row[..row_bytes]);
            }
            packed
        };

        Ok(Self {
            data,
            width,
            height,
            layout: sample.layout,
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    /// Tag the frame with its position in the stream.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes. Frames are always packed.
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Private copy of the pixels for drawing.
    pub fn working_copy(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Build a frame from a working copy, keeping this frame's metadata.
    pub fn derive(&self, data: Vec<u8>) -> Result<Self, FrameError> {
        let mut frame = Self::new(data, self.width, self.height, self.layout)?;
        frame.sequence = self.sequence;
        frame.captured_at = self.captured_at;
        Ok(frame)
    }
}

fn packed_len(width: u32, height: u32, layout: PixelLayout) -> usize {
    width as usize * height as usize * layout.bytes_per_pixel()
}
