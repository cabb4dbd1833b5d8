//! In-memory [`EncoderSink`] for tests and dry runs.
//!
//! Records every timestamp it receives, writes a small text file at the
//! output path, and can simulate a sink that stops accepting data or fails
//! to finalize.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use stylecam_camera::Frame;

use crate::{EncoderError, EncoderSink, MediaTime, OutputSettings, ReadySignal, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkLog {
    pub path: Option<PathBuf>,
    /// (pts, duration) per appended frame, in append order.
    pub timestamps: Vec<(MediaTime, MediaTime)>,
    pub sizes: Vec<(u32, u32)>,
    pub finalized: bool,
    pub aborted: bool,
}

impl SinkLog {
    pub fn frame_count(&self) -> usize {
        self.timestamps.len()
    }

    /// End time of the last frame: what a player would report as the length.
    pub fn duration(&self) -> Option<MediaTime> {
        self.timestamps
            .last()
            .map(|(pts, duration)| MediaTime::new(pts.value + duration.value, pts.timescale))
    }
}

#[derive(Default)]
struct Shared {
    log: Mutex<SinkLog>,
    ready: Mutex<Option<Arc<ReadySignal>>>,
}

/// Observer for a [`MemorySink`] that has been moved into an encoder.
#[derive(Clone)]
pub struct MemorySinkHandle {
    shared: Arc<Shared>,
}

impl MemorySinkHandle {
    pub fn log(&self) -> SinkLog {
        self.shared.log.lock().clone()
    }

    /// Let a stalled sink accept data again.
    pub fn release(&self) {
        if let Some(ready) = self.shared.ready.lock().as_ref() {
            ready.set_ready(true);
        }
    }
}

#[derive(Default)]
pub struct MemorySink {
    shared: Arc<Shared>,
    stall_after: Option<usize>,
    fail_finalize: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report "not ready" once `frames` frames have been appended.
    pub fn stall_after(mut self, frames: usize) -> Self {
        self.stall_after = Some(frames);
        self
    }

    pub fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle { shared: Arc::clone(&self.shared) }
    }
}

impl EncoderSink for MemorySink {
    fn open(&mut self, settings: &OutputSettings, path: &Path, ready: Arc<ReadySignal>) -> Result<()> {
        let header = format!("stylecam memory sink {}x{}@{}\n", settings.width, settings.height, settings.fps);
        fs::write(path, header).map_err(|e| EncoderError::Io { path: path.to_path_buf(), source: e })?;
        self.shared.log.lock().path = Some(path.to_path_buf());
        *self.shared.ready.lock() = Some(ready);
        Ok(())
    }

    fn append(&mut self, frame: &Frame, pts: MediaTime, duration: MediaTime) -> Result<()> {
        let appended = {
            let mut log = self.shared.log.lock();
            log.timestamps.push((pts, duration));
            log.sizes.push(frame.dimensions());
            log.timestamps.len()
        };
        if self.stall_after == Some(appended) {
            if let Some(ready) = self.shared.ready.lock().as_ref() {
                ready.set_ready(false);
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.fail_finalize {
            return Err(EncoderError::Pipeline("simulated finalize failure".into()));
        }
        let mut log = self.shared.log.lock();
        if let (Some(path), Some(end)) = (log.path.clone(), log.duration()) {
            let summary = format!("frames={}\nduration={}\n", log.frame_count(), end);
            let mut contents = fs::read_to_string(&path).map_err(|e| EncoderError::Io { path: path.clone(), source: e })?;
            contents.push_str(&summary);
            fs::write(&path, contents).map_err(|e| EncoderError::Io { path, source: e })?;
        }
        log.finalized = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.shared.log.lock().aborted = true;
    }
}
