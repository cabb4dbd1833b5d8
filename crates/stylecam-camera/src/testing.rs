//! Deterministic camera source for tests and demos without hardware.
//!
//! [`SyntheticCamera`] produces flat NV12 frames at a fixed interval and
//! exposes a [`SourceProbe`] so callers can observe start/stop activity
//! after the source has been moved into a [`CaptureSession`](crate::CaptureSession).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{CameraError, CameraPosition, CameraSource, Frame, PixelBuffer, Result};

/// Shared view of a synthetic source's lifecycle.
#[derive(Clone, Default)]
pub struct SourceProbe {
    running: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    frames: Arc<AtomicUsize>,
}

impl SourceProbe {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Acquire)
    }
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::Acquire)
    }
    pub fn frames_delivered(&self) -> usize {
        self.frames.load(Ordering::Acquire)
    }
}

pub struct SyntheticCamera {
    position: CameraPosition,
    width: u32,
    height: u32,
    luma: u8,
    chroma: (u8, u8),
    interval: Duration,
    remaining: Option<usize>,
    fail_start: bool,
    stalled: bool,
    probe: SourceProbe,
}

impl SyntheticCamera {
    pub fn new(position: CameraPosition, width: u32, height: u32) -> Self {
        Self {
            position,
            width,
            height,
            luma: 128,
            chroma: (128, 128),
            interval: Duration::ZERO,
            remaining: None,
            fail_start: false,
            stalled: false,
            probe: SourceProbe::default(),
        }
    }

    /// Flat colour for every frame.
    pub fn with_color(mut self, luma: u8, cb: u8, cr: u8) -> Self {
        self.luma = luma;
        self.chroma = (cb, cr);
        self
    }

    /// Sleep this long before each frame.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Report [`CameraError::EndOfStream`] after `count` frames.
    pub fn with_frame_limit(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    /// Make `start()` fail, to exercise configuration rollback.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Never produce a frame: every pull waits out its timeout, like a
    /// device that stopped streaming without signalling end of stream.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }

    /// Build one NV12 frame with the given flat colour.
    pub fn nv12_frame(width: u32, height: u32, luma: u8, cb: u8, cr: u8) -> Result<Frame> {
        let luma_len = (width * height) as usize;
        let mut bytes = vec![luma; Frame::nv12_len(width, height)];
        for pair in bytes[luma_len..].chunks_exact_mut(2) {
            pair[0] = cb;
            pair[1] = cr;
        }
        Ok(Frame::nv12_packed(width, height, PixelBuffer::from_vec(bytes))?)
    }
}

impl CameraSource for SyntheticCamera {
    fn position(&self) -> CameraPosition {
        self.position
    }

    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(CameraError::Configuration(format!("{:?} device unavailable", self.position)));
        }
        if self.probe.running.swap(true, Ordering::AcqRel) {
            return Err(CameraError::Configuration(format!("{:?} already running", self.position)));
        }
        self.probe.starts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.probe.running.swap(false, Ordering::AcqRel) {
            return Err(CameraError::Configuration(format!("{:?} is not running", self.position)));
        }
        self.probe.stops.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.probe.is_running()
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Frame> {
        if !self.probe.is_running() {
            return Err(CameraError::NotRunning);
        }
        if self.stalled {
            std::thread::sleep(timeout);
            return Err(CameraError::Timeout(timeout));
        }
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(CameraError::EndOfStream);
            }
            *remaining -= 1;
        }
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        let index = self.probe.frames.fetch_add(1, Ordering::AcqRel) as u32;
        let (cb, cr) = self.chroma;
        let frame = Self::nv12_frame(self.width, self.height, self.luma, cb, cr)?;
        Ok(frame.with_pts(Some(self.interval * index)))
    }
}
