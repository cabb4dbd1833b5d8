//! Frame model shared by every pipeline stage.

use std::time::Duration;

use thiserror::Error;

use crate::pool::{PixelBuffer, PoolError, PooledBuffer};

/// Pixel layout tag carried by every [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Bi-planar Y'CbCr 4:2:0, video range: luma plane + interleaved CbCr plane.
    Nv12,
    /// Interleaved 8-bit R, G, B, A.
    Rgba8,
}

impl PixelFormat {
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::Rgba8 => 1,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected a {expected:?} frame, got {actual:?}")]
    FormatMismatch { expected: PixelFormat, actual: PixelFormat },
    #[error("expected {expected} planes, got {actual}")]
    PlaneCount { expected: usize, actual: usize },
    #[error("plane {index} lies outside the {len}-byte buffer")]
    PlaneBounds { index: usize, len: usize },
    #[error("frame dimensions {width}x{height} are not valid for {format:?}")]
    Dimensions { format: PixelFormat, width: u32, height: u32 },
}

/// Location of one plane inside the frame's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    pub stride: usize,
    pub rows: usize,
}

impl Plane {
    fn end(&self) -> usize {
        self.offset + self.stride * self.rows
    }
}

/// One image at one pipeline stage. Cloning shares the pixel storage.
#[derive(Debug, Clone)]
pub struct Frame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Plane>,
    pub buffer: PixelBuffer,
    pub pts: Option<Duration>,
}

impl Frame {
    /// Build a frame, checking that every plane fits in `buffer`.
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: Vec<Plane>,
        buffer: PixelBuffer,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Dimensions { format, width, height });
        }
        for (index, plane) in planes.iter().enumerate() {
            if plane.end() > buffer.len() {
                return Err(FrameError::PlaneBounds { index, len: buffer.len() });
            }
        }
        Ok(Self { format, width, height, planes, buffer, pts: None })
    }

    /// Tightly packed RGBA frame (stride == width * 4).
    pub fn rgba(width: u32, height: u32, buffer: PixelBuffer) -> Result<Self, FrameError> {
        let plane = Plane { offset: 0, stride: width as usize * 4, rows: height as usize };
        Self::new(PixelFormat::Rgba8, width, height, vec![plane], buffer)
    }

    /// NV12 frame with the chroma plane directly after the luma plane.
    /// Odd sizes round the chroma plane up to whole CbCr pairs and rows.
    pub fn nv12_packed(width: u32, height: u32, buffer: PixelBuffer) -> Result<Self, FrameError> {
        let w = width as usize;
        let h = height as usize;
        let (chroma_stride, chroma_rows) = nv12_chroma_geometry(width, height);
        let planes = vec![
            Plane { offset: 0, stride: w, rows: h },
            Plane { offset: w * h, stride: chroma_stride, rows: chroma_rows },
        ];
        Self::new(PixelFormat::Nv12, width, height, planes, buffer)
    }

    /// Byte length of a packed NV12 frame.
    pub fn nv12_len(width: u32, height: u32) -> usize {
        let (chroma_stride, chroma_rows) = nv12_chroma_geometry(width, height);
        width as usize * height as usize + chroma_stride * chroma_rows
    }

    pub fn with_pts(mut self, pts: Option<Duration>) -> Self {
        self.pts = pts;
        self
    }

    /// Fail fast when a stage receives a frame it cannot interpret.
    pub fn expect_format(&self, expected: PixelFormat) -> Result<(), FrameError> {
        if self.format != expected {
            return Err(FrameError::FormatMismatch { expected, actual: self.format });
        }
        if self.planes.len() != expected.plane_count() {
            return Err(FrameError::PlaneCount {
                expected: expected.plane_count(),
                actual: self.planes.len(),
            });
        }
        Ok(())
    }

    /// Bytes of plane `index`, from its offset through its last row.
    pub fn plane_data(&self, index: usize) -> Option<&[u8]> {
        let plane = self.planes.get(index)?;
        self.buffer.get(plane.offset..plane.end())
    }

    pub fn plane_stride(&self, index: usize) -> Option<usize> {
        self.planes.get(index).map(|p| p.stride)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Same frame backed by storage outside any pool. Frames that must
    /// outlive the live path (recordings) are detached so they never hold
    /// working-pool buffers.
    pub fn detach(&self) -> Result<Frame, PoolError> {
        if !self.buffer.is_pooled() {
            return Ok(self.clone());
        }
        let mut owned = PooledBuffer::unpooled(self.buffer.len())?;
        owned.copy_from_slice(&self.buffer);
        Ok(Frame { buffer: owned.freeze(), ..self.clone() })
    }
}

/// Minimum (row bytes, rows) of the interleaved CbCr plane of a 4:2:0 frame.
pub fn nv12_chroma_geometry(width: u32, height: u32) -> (usize, usize) {
    (2 * (width as usize).div_ceil(2), (height as usize).div_ceil(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_layout_splits_luma_and_chroma() {
        let buf = PixelBuffer::from_vec(vec![0u8; 4 * 2 * 3 / 2]);
        let frame = Frame::nv12_packed(4, 2, buf).unwrap();
        assert_eq!(frame.plane_data(0).unwrap().len(), 8);
        assert_eq!(frame.plane_data(1).unwrap().len(), 4);
        assert!(frame.expect_format(PixelFormat::Nv12).is_ok());
    }

    #[test]
    fn odd_nv12_rounds_chroma_up() {
        assert_eq!(nv12_chroma_geometry(5, 3), (6, 2));
        assert_eq!(Frame::nv12_len(5, 3), 15 + 12);
        let frame = Frame::nv12_packed(5, 3, PixelBuffer::from_vec(vec![0u8; 27])).unwrap();
        assert_eq!(frame.planes[1], Plane { offset: 15, stride: 6, rows: 2 });
        assert!(Frame::nv12_packed(5, 3, PixelBuffer::from_vec(vec![0u8; 26])).is_err());
    }

    #[test]
    fn detach_copies_out_of_the_pool() {
        let pool = crate::BufferPool::new(16, 1);
        let mut buf = pool.acquire().unwrap();
        buf.fill(7);
        let pooled = Frame::rgba(2, 2, buf.freeze()).unwrap();

        let detached = pooled.detach().unwrap();
        drop(pooled);
        assert_eq!(pool.outstanding(), 0);
        assert!(!detached.buffer.is_pooled());
        assert!(detached.buffer.iter().all(|&b| b == 7));
    }

    #[test]
    fn mismatched_format_fails_fast() {
        let frame = Frame::rgba(2, 2, PixelBuffer::from_vec(vec![0u8; 16])).unwrap();
        assert_eq!(
            frame.expect_format(PixelFormat::Nv12),
            Err(FrameError::FormatMismatch { expected: PixelFormat::Nv12, actual: PixelFormat::Rgba8 })
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = Frame::rgba(4, 4, PixelBuffer::from_vec(vec![0u8; 10])).unwrap_err();
        assert!(matches!(err, FrameError::PlaneBounds { index: 0, len: 10 }));
    }
}
