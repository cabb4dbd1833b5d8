//! Output file settings.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::timing::frame_duration;
use crate::{EncoderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

impl VideoCodec {
    /// GStreamer encoder element.
    pub fn encoder_element(self) -> &'static str {
        match self {
            VideoCodec::H264 => "x264enc",
            VideoCodec::Hevc => "x265enc",
        }
    }

    /// GStreamer parser element feeding the muxer.
    pub fn parser_element(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
            VideoCodec::Hevc => "h265parse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: VideoCodec,
    /// File stem.
    pub filename: String,
    pub extension: String,
    /// `None` writes into the user cache directory.
    pub directory: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            fps: 30,
            codec: VideoCodec::H264,
            filename: "render".into(),
            extension: "mp4".into(),
            directory: None,
        }
    }
}

impl OutputSettings {
    pub fn output_dir(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir().unwrap_or_else(env::temp_dir).join("stylecam"),
        }
    }

    /// `<dir>/<filename>.<extension>`
    pub fn output_path(&self) -> PathBuf {
        self.output_dir().join(format!("{}.{}", self.filename, self.extension))
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::InvalidSettings(format!(
                "output size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.filename.is_empty() || self.filename.contains(['/', '\\']) {
            return Err(EncoderError::InvalidSettings(format!("bad output file name {:?}", self.filename)));
        }
        frame_duration(self.fps)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_write_render_mp4_into_cache() {
        let settings = OutputSettings::default();
        settings.validate().unwrap();
        let path = settings.output_path();
        assert_eq!(path.file_name().unwrap(), "render.mp4");
        assert!(path.parent().unwrap().ends_with("stylecam"));
    }

    #[test]
    fn explicit_directory_wins() {
        let settings = OutputSettings { directory: Some("/tmp/out".into()), ..Default::default() };
        assert_eq!(settings.output_path(), PathBuf::from("/tmp/out/render.mp4"));
    }

    #[test]
    fn rejects_degenerate_settings() {
        let zero = OutputSettings { width: 0, ..Default::default() };
        assert!(matches!(zero.validate(), Err(EncoderError::InvalidSettings(_))));
        let odd_rate = OutputSettings { fps: 29, ..Default::default() };
        assert!(matches!(odd_rate.validate(), Err(EncoderError::InvalidFrameRate(29))));
    }

    #[test]
    fn deserializes_partial_json() {
        let settings: OutputSettings = serde_json::from_str(r#"{"fps": 24, "codec": "hevc"}"#).unwrap();
        assert_eq!(settings.fps, 24);
        assert_eq!(settings.codec, VideoCodec::Hevc);
        assert_eq!(settings.width, 256);
    }
}
