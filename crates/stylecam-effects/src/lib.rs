// stylecam-effects/src/lib.rs
// ============================================================
// stylecam-effects  –  Style-transfer stage for StyleCam
// Runs one ONNX generator network per effect via Tract
// (pure-Rust), behind a small FrameTransform trait.
// ------------------------------------------------------------
// Pipeline: RGBA Frame → Tensor [1,3,H,W] → RGBA Frame
// ------------------------------------------------------------
// Public API
//   * EffectKind                  – comics | anime | simpson | noise
//   * FrameTransform::apply(f)    – Option<Frame>, None = no stylisation
//   * EffectRegistry              – effect → transform dispatch
//   * StyleModel::load(path)      – load & optimise ONNX
// ============================================================

//! StyleCam – effect layer
//!
//! Effects are looked up in an [`EffectRegistry`] rather than a central
//! `match`: each effect maps to an `Arc<dyn FrameTransform>`, and adding an
//! effect means registering another transform. [`EffectKind::Noise`] is the
//! pass-through effect and never produces a frame.
//!
//! Failures never escape [`EffectRegistry::apply`]: a missing model or a
//! failed inference degrades to "no stylisation" for that frame.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stylecam_camera::{Frame, FrameError, PoolError};
use thiserror::Error;
use tract_onnx::prelude::TractError;

pub mod model;

pub use model::{ModelConfig, Normalization, StyleModel};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Model load or inference error: {0}")]
    Tract(#[from] TractError),
    #[error(transparent)]
    Format(#[from] FrameError),
    #[error("Could not allocate output frame: {0}")]
    Allocation(#[from] PoolError),
    #[error("Model expects {expected:?} input, got {actual:?}")]
    InputSize { expected: (u32, u32), actual: (u32, u32) },
    #[error("Invalid output shape: expected [1, 3, H, W], got {0:?}")]
    InvalidOutputShape(Vec<usize>),
    #[error("No transform registered for {0}")]
    Unavailable(EffectKind),
}

pub type Result<T> = std::result::Result<T, TransformError>;

/// The closed set of effects the camera offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    #[default]
    Comics,
    Anime,
    Simpson,
    /// Pass-through: always yields no stylised frame.
    Noise,
}

impl EffectKind {
    pub const ALL: [EffectKind; 4] = [EffectKind::Comics, EffectKind::Anime, EffectKind::Simpson, EffectKind::Noise];

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::Comics => "comics",
            EffectKind::Anime => "anime",
            EffectKind::Simpson => "simpson",
            EffectKind::Noise => "noise",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown effect {0:?}")]
pub struct ParseEffectError(String);

impl FromStr for EffectKind {
    type Err = ParseEffectError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EffectKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEffectError(s.to_string()))
    }
}

/// One per-frame image effect.
///
/// `Ok(None)` means "no stylised result for this frame"; callers fall back to
/// the input. Implementations must be callable from several threads.
pub trait FrameTransform: Send + Sync {
    fn apply(&self, frame: &Frame) -> Result<Option<Frame>>;
}

impl<F> FrameTransform for F
where
    F: Fn(&Frame) -> Result<Option<Frame>> + Send + Sync,
{
    fn apply(&self, frame: &Frame) -> Result<Option<Frame>> {
        self(frame)
    }
}

/// Effect → transform dispatch table.
#[derive(Clone, Default)]
pub struct EffectRegistry {
    transforms: HashMap<EffectKind, Arc<dyn FrameTransform>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every model named in `config`. Models that fail to load are
    /// logged and left unregistered; their effect then passes frames through.
    pub fn from_config(config: &ModelConfig) -> Self {
        let mut registry = Self::new();
        for (&kind, path) in &config.models {
            match StyleModel::load(path, config.image_size, config.normalization) {
                Ok(model) => {
                    log::info!("loaded {} model from {}", kind, path.display());
                    registry.register(kind, Arc::new(model));
                }
                Err(e) => log::warn!("{} model at {} unavailable: {}", kind, path.display(), e),
            }
        }
        registry
    }

    /// Register (or replace) the transform for `kind`. `Noise` cannot be
    /// overridden.
    pub fn register(&mut self, kind: EffectKind, transform: Arc<dyn FrameTransform>) -> Option<Arc<dyn FrameTransform>> {
        if kind == EffectKind::Noise {
            log::warn!("ignoring transform registered for the pass-through effect");
            return None;
        }
        self.transforms.insert(kind, transform)
    }

    pub fn is_available(&self, kind: EffectKind) -> bool {
        self.transforms.contains_key(&kind)
    }

    /// Apply `kind`, reporting why no frame was produced.
    pub fn try_apply(&self, kind: EffectKind, frame: &Frame) -> Result<Option<Frame>> {
        if kind == EffectKind::Noise {
            return Ok(None);
        }
        let transform = self.transforms.get(&kind).ok_or(TransformError::Unavailable(kind))?;
        transform.apply(frame)
    }

    /// Apply `kind`; every failure degrades to `None`.
    pub fn apply(&self, kind: EffectKind, frame: &Frame) -> Option<Frame> {
        match self.try_apply(kind, frame) {
            Ok(out) => out,
            Err(TransformError::Unavailable(kind)) => {
                log::trace!("{kind} transform unavailable, passing frame through");
                None
            }
            Err(e) => {
                log::warn!("{kind} transform failed: {e}");
                None
            }
        }
    }
}
