//! stylecam‑preprocess – colour-convert + resize NV12 camera frames.
//!
//! [`Preprocessor::run`] is the per-frame hot path: NV12 → RGBA with a
//! precomputed [`ConversionMatrix`], then a deterministic resample to the
//! working resolution. [`FrameResizer::aspect_fit`] and [`export`] cover the
//! still-image side (letterboxed scaling, PNG output).

use stylecam_camera::{BufferPool, Frame, FrameError, PoolError};
use thiserror::Error;

pub mod color;
pub mod export;
pub mod scale;

pub use color::{ColorConverter, ColorStandard, ConversionMatrix, PixelRange};
pub use scale::{FitRect, FrameResizer, ResizeFilter};

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("unsupported frame layout: {0}")]
    Format(#[from] FrameError),
    #[error("no destination buffer: {0}")]
    Allocation(#[from] PoolError),
    #[error("resampler failed: {0}")]
    Resize(#[from] resize::Error),
    #[error("invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },
    #[error("image export failed: {0}")]
    Image(#[from] image::ImageError),
}

impl PreprocessError {
    /// Whether the failure came from running out of pixel buffers.
    pub fn is_allocation(&self) -> bool {
        matches!(self, PreprocessError::Allocation(_))
    }
}

pub type Result<T> = std::result::Result<T, PreprocessError>;

/// Camera frame → working-resolution RGBA frame.
#[derive(Clone)]
pub struct Preprocessor {
    converter: ColorConverter,
    resizer: FrameResizer,
    dst_w: u32,
    dst_h: u32,
}

impl Preprocessor {
    /// Create a pre‑processor that outputs WxH RGBA, allocating as it goes.
    pub fn new(dst_w: u32, dst_h: u32) -> Self {
        Self {
            converter: ColorConverter::new(ConversionMatrix::default()),
            resizer: FrameResizer::default(),
            dst_w,
            dst_h,
        }
    }

    /// Same, but drawing converted frames from `sensor_pool` and working
    /// frames from `working_pool`.
    pub fn with_pools(
        dst_w: u32,
        dst_h: u32,
        matrix: ConversionMatrix,
        sensor_pool: BufferPool,
        working_pool: BufferPool,
        filter: ResizeFilter,
    ) -> Self {
        Self {
            converter: ColorConverter::with_pool(matrix, sensor_pool),
            resizer: FrameResizer::with_pool(working_pool, filter),
            dst_w,
            dst_h,
        }
    }

    pub fn working_size(&self) -> (u32, u32) {
        (self.dst_w, self.dst_h)
    }

    pub fn resizer(&self) -> &FrameResizer {
        &self.resizer
    }

    /// Convert then resize. The intermediate full-size RGBA frame is released
    /// before returning.
    pub fn run(&self, frame: &Frame) -> Result<Frame> {
        let rgba = self.converter.convert(frame)?;
        self.resizer.resize(&rgba, self.dst_w, self.dst_h)
    }
}
