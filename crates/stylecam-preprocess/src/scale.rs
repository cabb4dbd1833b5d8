//! RGBA rescaling: direct resample and centred aspect-fit.

use std::borrow::Cow;

use resize::{Pixel, Type};
use rgb::FromSlice;
use serde::{Deserialize, Serialize};
use stylecam_camera::{BufferPool, Frame, PixelFormat, PooledBuffer};

use crate::{PreprocessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    fn to_type(self) -> Type {
        match self {
            ResizeFilter::Nearest => Type::Point,
            ResizeFilter::Triangle => Type::Triangle,
            ResizeFilter::CatmullRom => Type::Catrom,
            ResizeFilter::Lanczos3 => Type::Lanczos3,
        }
    }
}

/// Offset and size of the image drawn inside an aspect-fit canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FitRect {
    /// Scale `src` to fit inside `canvas`, keeping its aspect ratio, centred.
    pub fn aspect_fit(src: (u32, u32), canvas: (u32, u32)) -> Self {
        let ratio = (f64::from(canvas.0) / f64::from(src.0)).min(f64::from(canvas.1) / f64::from(src.1));
        let width = ((f64::from(src.0) * ratio).round() as u32).clamp(1, canvas.0);
        let height = ((f64::from(src.1) * ratio).round() as u32).clamp(1, canvas.1);
        Self { x: (canvas.0 - width) / 2, y: (canvas.1 - height) / 2, width, height }
    }
}

/// Deterministic RGBA resizer. Shares the working-resolution pool between the
/// live and record-stop paths.
#[derive(Clone)]
pub struct FrameResizer {
    pool: Option<BufferPool>,
    filter: ResizeFilter,
}

impl FrameResizer {
    pub fn new(filter: ResizeFilter) -> Self {
        Self { pool: None, filter }
    }

    pub fn with_pool(pool: BufferPool, filter: ResizeFilter) -> Self {
        Self { pool: Some(pool), filter }
    }

    pub fn pool(&self) -> Option<&BufferPool> {
        self.pool.as_ref()
    }

    /// Resample to exactly `dst_w`×`dst_h`.
    pub fn resize(&self, frame: &Frame, dst_w: u32, dst_h: u32) -> Result<Frame> {
        frame.expect_format(PixelFormat::Rgba8)?;
        if dst_w == 0 || dst_h == 0 {
            return Err(PreprocessError::InvalidTarget { width: dst_w, height: dst_h });
        }

        let src = packed_rgba(frame)?;
        let mut dst = PooledBuffer::from_pool_or_alloc(self.pool.as_ref(), dst_w as usize * dst_h as usize * 4)?;

        if frame.dimensions() == (dst_w, dst_h) {
            dst.copy_from_slice(&src);
        } else {
            let mut resizer = resize::new(
                frame.width as usize,
                frame.height as usize,
                dst_w as usize,
                dst_h as usize,
                Pixel::RGBA8,
                self.filter.to_type(),
            )?;
            resizer.resize(src.as_rgba(), dst.as_rgba_mut())?;
        }

        Ok(Frame::rgba(dst_w, dst_h, dst.freeze())?.with_pts(frame.pts))
    }

    /// Aspect-fit into a `canvas_w`×`canvas_h` canvas cleared to transparent
    /// black, image centred with letterbox/pillarbox bars.
    pub fn aspect_fit(&self, frame: &Frame, canvas_w: u32, canvas_h: u32) -> Result<Frame> {
        if canvas_w == 0 || canvas_h == 0 {
            return Err(PreprocessError::InvalidTarget { width: canvas_w, height: canvas_h });
        }
        let rect = FitRect::aspect_fit(frame.dimensions(), (canvas_w, canvas_h));
        let fitted = self.resize(frame, rect.width, rect.height)?;

        let row_len = canvas_w as usize * 4;
        let mut canvas = PooledBuffer::from_pool_or_alloc(self.pool.as_ref(), row_len * canvas_h as usize)?;
        canvas.fill(0);

        let fit_row = rect.width as usize * 4;
        let x0 = rect.x as usize * 4;
        for (j, src_row) in fitted.buffer.chunks_exact(fit_row).enumerate() {
            let start = (rect.y as usize + j) * row_len + x0;
            canvas[start..start + fit_row].copy_from_slice(src_row);
        }

        Ok(Frame::rgba(canvas_w, canvas_h, canvas.freeze())?.with_pts(frame.pts))
    }
}

impl Default for FrameResizer {
    fn default() -> Self {
        Self::new(ResizeFilter::default())
    }
}

/// RGBA bytes with stride == width * 4, copying only when the frame is padded.
pub(crate) fn packed_rgba(frame: &Frame) -> Result<Cow<'_, [u8]>> {
    let row_len = frame.width as usize * 4;
    let rows = frame.height as usize;
    let data = frame.plane_data(0).ok_or(stylecam_camera::FrameError::PlaneCount { expected: 1, actual: 0 })?;
    let stride = frame.plane_stride(0).unwrap_or(row_len);

    if stride < row_len || data.len() < (rows - 1) * stride + row_len {
        return Err(stylecam_camera::FrameError::PlaneBounds { index: 0, len: data.len() }.into());
    }
    if stride == row_len {
        return Ok(Cow::Borrowed(&data[..row_len * rows]));
    }
    let mut packed = Vec::with_capacity(row_len * rows);
    for j in 0..rows {
        packed.extend_from_slice(&data[j * stride..j * stride + row_len]);
    }
    Ok(Cow::Owned(packed))
}
