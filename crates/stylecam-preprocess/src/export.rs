//! Still-image export.

use std::path::Path;

use image::{ImageFormat, RgbaImage};
use stylecam_camera::{Frame, FrameError, PixelFormat};

use crate::scale::packed_rgba;
use crate::{FrameResizer, Result};

/// Copy an RGBA frame into an `image` buffer.
pub fn to_rgba_image(frame: &Frame) -> Result<RgbaImage> {
    frame.expect_format(PixelFormat::Rgba8)?;
    let bytes = packed_rgba(frame)?.into_owned();
    RgbaImage::from_raw(frame.width, frame.height, bytes)
        .ok_or_else(|| FrameError::PlaneBounds { index: 0, len: frame.buffer.len() }.into())
}

/// Aspect-fit `frame` into a `canvas_w`×`canvas_h` canvas and write it as PNG.
pub fn save_png(frame: &Frame, canvas_w: u32, canvas_h: u32, path: &Path) -> Result<()> {
    let fitted = FrameResizer::default().aspect_fit(frame, canvas_w, canvas_h)?;
    to_rgba_image(&fitted)?.save_with_format(path, ImageFormat::Png)?;
    log::debug!("saved {}x{} still to {}", canvas_w, canvas_h, path.display());
    Ok(())
}
