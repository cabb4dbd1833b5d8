//! Y'CbCr (NV12) → RGBA conversion with a precomputed fixed-point matrix.

use serde::{Deserialize, Serialize};
use stylecam_camera::{nv12_chroma_geometry, BufferPool, Frame, FrameError, PixelFormat, PooledBuffer};

use crate::Result;

const FRAC_BITS: u32 = 14;
const ROUND: i32 = 1 << (FRAC_BITS - 1);

/// Sample range of the incoming Y'CbCr data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRange {
    pub luma_bias: u8,
    pub chroma_bias: u8,
    pub luma_max: u8,
    pub chroma_max: u8,
}

impl PixelRange {
    /// Video range: luma [16,235], chroma [16,240] centred on 128.
    pub const VIDEO: PixelRange = PixelRange { luma_bias: 16, chroma_bias: 128, luma_max: 235, chroma_max: 240 };
    pub const FULL: PixelRange = PixelRange { luma_bias: 0, chroma_bias: 128, luma_max: 255, chroma_max: 255 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorStandard {
    /// ITU-R BT.601-4
    Bt601,
    /// ITU-R BT.709
    Bt709,
}

impl ColorStandard {
    /// (Kr, Kb)
    fn weights(self) -> (f64, f64) {
        match self {
            ColorStandard::Bt601 => (0.299, 0.114),
            ColorStandard::Bt709 => (0.2126, 0.0722),
        }
    }
}

/// Fixed-point Y'CbCr → RGB coefficients. Build once, reuse for every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionMatrix {
    luma_bias: i32,
    chroma_bias: i32,
    y: i32,
    r_cr: i32,
    g_cb: i32,
    g_cr: i32,
    b_cb: i32,
}

impl ConversionMatrix {
    pub fn generate(standard: ColorStandard, range: PixelRange) -> Self {
        let (kr, kb) = standard.weights();
        let kg = 1.0 - kr - kb;

        let y_scale = 255.0 / f64::from(range.luma_max - range.luma_bias);
        let c_scale = 255.0 / (2.0 * f64::from(range.chroma_max - range.chroma_bias));

        let fixed = |v: f64| (v * f64::from(1u32 << FRAC_BITS)).round() as i32;
        Self {
            luma_bias: i32::from(range.luma_bias),
            chroma_bias: i32::from(range.chroma_bias),
            y: fixed(y_scale),
            r_cr: fixed(2.0 * (1.0 - kr) * c_scale),
            g_cb: fixed(-2.0 * (1.0 - kb) * kb / kg * c_scale),
            g_cr: fixed(-2.0 * (1.0 - kr) * kr / kg * c_scale),
            b_cb: fixed(2.0 * (1.0 - kb) * c_scale),
        }
    }

    /// BT.601, video range – what phone and webcam sensors hand out.
    pub fn bt601_video_range() -> Self {
        Self::generate(ColorStandard::Bt601, PixelRange::VIDEO)
    }

    #[inline]
    pub fn to_rgb(&self, y: u8, cb: u8, cr: u8) -> [u8; 3] {
        let y = (i32::from(y) - self.luma_bias) * self.y;
        let cb = i32::from(cb) - self.chroma_bias;
        let cr = i32::from(cr) - self.chroma_bias;

        let clamp = |v: i32| ((v + ROUND) >> FRAC_BITS).clamp(0, 255) as u8;
        [
            clamp(y + self.r_cr * cr),
            clamp(y + self.g_cb * cb + self.g_cr * cr),
            clamp(y + self.b_cb * cb),
        ]
    }
}

impl Default for ConversionMatrix {
    fn default() -> Self {
        Self::bt601_video_range()
    }
}

/// NV12 → RGBA converter. Output buffers come from `pool` when it holds
/// buffers of the right size.
#[derive(Clone)]
pub struct ColorConverter {
    matrix: ConversionMatrix,
    pool: Option<BufferPool>,
}

impl ColorConverter {
    pub fn new(matrix: ConversionMatrix) -> Self {
        Self { matrix, pool: None }
    }

    pub fn with_pool(matrix: ConversionMatrix, pool: BufferPool) -> Self {
        Self { matrix, pool: Some(pool) }
    }

    pub fn matrix(&self) -> &ConversionMatrix {
        &self.matrix
    }

    /// Convert a two-plane frame into a freshly checked-out RGBA frame.
    pub fn convert(&self, frame: &Frame) -> Result<Frame> {
        frame.expect_format(PixelFormat::Nv12)?;

        let w = frame.width as usize;
        let h = frame.height as usize;
        // Odd edges share the last CbCr pair / row.
        let (chroma_len, chroma_rows) = nv12_chroma_geometry(frame.width, frame.height);
        let (luma, luma_stride) = plane(frame, 0, h - 1, w)?;
        let (chroma, chroma_stride) = plane(frame, 1, chroma_rows - 1, chroma_len)?;

        let mut out = PooledBuffer::from_pool_or_alloc(self.pool.as_ref(), w * h * 4)?;
        for (j, out_row) in out.chunks_exact_mut(w * 4).enumerate() {
            let y_row = &luma[j * luma_stride..j * luma_stride + w];
            let c_row = &chroma[(j / 2) * chroma_stride..(j / 2) * chroma_stride + chroma_len];
            for (i, px) in out_row.chunks_exact_mut(4).enumerate() {
                let c = i & !1;
                let [r, g, b] = self.matrix.to_rgb(y_row[i], c_row[c], c_row[c + 1]);
                px.copy_from_slice(&[r, g, b, 255]);
            }
        }

        Ok(Frame::rgba(frame.width, frame.height, out.freeze())?.with_pts(frame.pts))
    }
}

/// Plane bytes plus stride, verifying that `last_row` still has `row_len` bytes.
fn plane(frame: &Frame, index: usize, last_row: usize, row_len: usize) -> Result<(&[u8], usize)> {
    let data = frame.plane_data(index).ok_or(FrameError::PlaneCount {
        expected: PixelFormat::Nv12.plane_count(),
        actual: frame.planes.len(),
    })?;
    let stride = frame.plane_stride(index).unwrap_or(0);
    if stride < row_len || data.len() < last_row * stride + row_len {
        return Err(FrameError::PlaneBounds { index, len: data.len() }.into());
    }
    Ok((data, stride))
}
