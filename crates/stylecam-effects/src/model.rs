//! ONNX style-transfer generator run through Tract.
//!
//! The network takes one RGB image as `[1, 3, H, W]` f32 and returns one RGB
//! image of the same layout. Output height/width come from the network, so a
//! model may hand back a different resolution than it was fed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stylecam_camera::{Frame, FrameError, PixelFormat, PooledBuffer};
use tract_onnx::prelude::*;

use crate::{EffectKind, FrameTransform, Result, TransformError};

/// Pixel value mapping between `u8` and the network's f32 domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// [0, 1]
    Unit,
    /// [-1, 1]
    #[default]
    Signed,
}

impl Normalization {
    #[inline]
    fn encode(self, v: u8) -> f32 {
        let unit = f32::from(v) / 255.0;
        match self {
            Normalization::Unit => unit,
            Normalization::Signed => unit * 2.0 - 1.0,
        }
    }

    #[inline]
    fn decode(self, v: f32) -> u8 {
        let unit = match self {
            Normalization::Unit => v,
            Normalization::Signed => (v + 1.0) * 0.5,
        };
        (unit * 255.0).round().clamp(0.0, 255.0) as u8
    }
}

/// Which model backs which effect, and how to feed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// ONNX file per effect. `noise` entries are ignored.
    pub models: BTreeMap<EffectKind, PathBuf>,
    /// Model input dimensions (width, height)
    pub image_size: (u32, u32),
    pub normalization: Normalization,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let models = [EffectKind::Comics, EffectKind::Anime, EffectKind::Simpson]
            .into_iter()
            .map(|kind| (kind, PathBuf::from(format!("./models/{}.onnx", kind.name()))))
            .collect();
        Self { models, image_size: (256, 256), normalization: Normalization::default() }
    }
}

/// Tract-powered style-transfer generator.
pub struct StyleModel {
    model: RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>,
    width: usize,
    height: usize,
    normalization: Normalization,
}

impl StyleModel {
    /// Load and optimize the ONNX model for a fixed `(width, height)` input.
    pub fn load(model_path: &Path, image_size: (u32, u32), normalization: Normalization) -> Result<Self> {
        let (width, height) = (image_size.0 as usize, image_size.1 as usize);
        let model = tract_onnx::onnx()
            .model_for_path(model_path)?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec![1, 3, height, width]))?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self { model, width, height, normalization })
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }

    fn to_tensor(&self, frame: &Frame) -> Result<Tensor> {
        frame.expect_format(PixelFormat::Rgba8)?;
        if frame.dimensions() != self.input_size() {
            return Err(TransformError::InputSize { expected: self.input_size(), actual: frame.dimensions() });
        }
        let stride = frame.plane_stride(0).unwrap_or(self.width * 4);
        let data = frame.plane_data(0).unwrap_or_default();
        if stride < self.width * 4 || data.len() < self.height.saturating_sub(1) * stride + self.width * 4 {
            return Err(FrameError::PlaneBounds { index: 0, len: data.len() }.into());
        }

        let norm = self.normalization;
        let arr4 = tract_ndarray::Array4::from_shape_fn((1, 3, self.height, self.width), |(_, c, y, x)| {
            norm.encode(data[y * stride + x * 4 + c])
        });
        Ok(arr4.into_tensor())
    }
}

impl FrameTransform for StyleModel {
    fn apply(&self, frame: &Frame) -> Result<Option<Frame>> {
        let input = self.to_tensor(frame)?;
        let outputs = self.model.run(tvec![input.into()])?;
        let view = outputs[0].to_array_view::<f32>()?;

        let shape = view.shape().to_vec();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 3 || shape[2] == 0 || shape[3] == 0 {
            return Err(TransformError::InvalidOutputShape(shape));
        }
        let (out_h, out_w) = (shape[2], shape[3]);

        let mut out = PooledBuffer::unpooled(out_w * out_h * 4)?;
        for (idx, px) in out.chunks_exact_mut(4).enumerate() {
            let (y, x) = (idx / out_w, idx % out_w);
            for (c, v) in px[..3].iter_mut().enumerate() {
                *v = self.normalization.decode(view[[0, c, y, x]]);
            }
            px[3] = 255;
        }

        let styled = Frame::rgba(out_w as u32, out_h as u32, out.freeze())?;
        Ok(Some(styled.with_pts(frame.pts)))
    }
}
