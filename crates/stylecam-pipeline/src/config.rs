//! Top-level configuration, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use stylecam_camera::{CameraConfig, CameraPosition};
use stylecam_effects::{EffectKind, ModelConfig};
use stylecam_encoder::OutputSettings;
use stylecam_preprocess::{ColorStandard, ConversionMatrix, PixelRange, ResizeFilter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StyleCamConfig {
    pub camera: CameraConfig,
    pub initial_camera: CameraPosition,
    /// Inference and recording resolution (width, height).
    pub working_size: (u32, u32),
    /// Working-resolution buffers; recorded frames hold one each until encoded.
    pub pool_capacity: usize,
    /// Full-resolution RGBA buffers used between conversion and resize.
    pub sensor_pool_capacity: usize,
    pub color_standard: ColorStandard,
    pub pixel_range: PixelRange,
    pub resize_filter: ResizeFilter,
    pub effect: EffectKind,
    pub realtime_preview: bool,
    pub models: ModelConfig,
    pub output: OutputSettings,
    /// Consecutive allocation failures before the operator is told.
    pub allocation_failure_limit: u32,
    /// How long the encoder waits for a stalled sink, in milliseconds.
    pub encoder_ready_timeout_ms: u64,
}

impl Default for StyleCamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            initial_camera: CameraPosition::Back,
            working_size: (256, 256),
            pool_capacity: 1024,
            sensor_pool_capacity: 4,
            color_standard: ColorStandard::Bt601,
            pixel_range: PixelRange::VIDEO,
            resize_filter: ResizeFilter::default(),
            effect: EffectKind::Comics,
            realtime_preview: false,
            models: ModelConfig::default(),
            output: OutputSettings::default(),
            allocation_failure_limit: 8,
            encoder_ready_timeout_ms: 10_000,
        }
    }
}

impl StyleCamConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let (w, h) = self.working_size;
        if w == 0 || h == 0 {
            bail!("working size must be non-zero, got {w}x{h}");
        }
        if self.camera.width == 0 || self.camera.height == 0 || self.camera.fps == 0 {
            bail!(
                "camera mode must be non-zero, got {}x{}@{}",
                self.camera.width,
                self.camera.height,
                self.camera.fps
            );
        }
        if self.pool_capacity == 0 || self.sensor_pool_capacity == 0 {
            bail!("buffer pools need at least one buffer");
        }
        if self.allocation_failure_limit == 0 {
            bail!("allocation_failure_limit must be at least 1");
        }
        let (mw, mh) = self.models.image_size;
        if mw == 0 || mh == 0 {
            bail!("model input size must be non-zero, got {mw}x{mh}");
        }
        self.output.validate().context("invalid output settings")?;
        Ok(())
    }

    pub fn conversion_matrix(&self) -> ConversionMatrix {
        ConversionMatrix::generate(self.color_standard, self.pixel_range)
    }

    pub fn encoder_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_ready_timeout_ms)
    }
}
