// stylecam-encoder/src/lib.rs
// ============================================================
// stylecam-encoder  –  Recorded frames → timed video file
// Ordered RGBA frames in, one H.264/HEVC .mp4 out.
// ------------------------------------------------------------
// Timing: pts(i) = i * (600 / fps) on a 600-tick timescale
// Backpressure: ReadySignal (condvar), never drops frames
// ------------------------------------------------------------
// Public API
//   * VideoEncoder::new(settings, sink)
//   * VideoEncoder::start()          – clear stale file, open sink
//   * VideoEncoder::add_frame(f)     – blocks until sink ready
//   * VideoEncoder::finish(cb)       – async, cb fires exactly once
//   * GstSink / testing::MemorySink  – EncoderSink backends
// ============================================================

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stylecam_camera::{Frame, FrameError, PixelFormat};
use thiserror::Error;

pub mod gst_sink;
pub mod ready;
pub mod settings;
pub mod testing;
pub mod timing;

pub use gst_sink::GstSink;
pub use ready::ReadySignal;
pub use settings::{OutputSettings, VideoCodec};
pub use timing::{frame_duration, MediaTime, TIMESCALE};

/// Default bound on how long `add_frame` waits for the sink.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Invalid output settings: {0}")]
    InvalidSettings(String),
    #[error("Frame rate {0} does not divide the 600-tick timescale")]
    InvalidFrameRate(u32),
    #[error(transparent)]
    Format(#[from] FrameError),
    #[error("Frame is {actual:?}, encoder expects {expected:?}")]
    FrameSize { expected: (u32, u32), actual: (u32, u32) },
    #[error("Cannot {op} while encoder is {state:?}")]
    InvalidState { op: &'static str, state: EncoderState },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Pipeline error: {0}")]
    Pipeline(String),
    #[error("Sink not ready after {0:?}")]
    SinkStalled(Duration),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

impl EncoderError {
    fn io(path: &Path, source: io::Error) -> Self {
        EncoderError::Io { path: path.to_path_buf(), source }
    }
}

/// Where encoded frames go. `open` hands the sink the readiness flag it must
/// drive; `append` is only called while that flag is set.
pub trait EncoderSink: Send {
    fn open(&mut self, settings: &OutputSettings, path: &Path, ready: Arc<ReadySignal>) -> Result<()>;
    fn append(&mut self, frame: &Frame, pts: MediaTime, duration: MediaTime) -> Result<()>;
    /// Close input and write the container trailer. Blocks until done.
    fn finalize(&mut self) -> Result<()>;
    /// Tear down without finishing the file.
    fn abort(&mut self);
}

impl EncoderSink for Box<dyn EncoderSink> {
    fn open(&mut self, settings: &OutputSettings, path: &Path, ready: Arc<ReadySignal>) -> Result<()> {
        (**self).open(settings, path, ready)
    }
    fn append(&mut self, frame: &Frame, pts: MediaTime, duration: MediaTime) -> Result<()> {
        (**self).append(frame, pts, duration)
    }
    fn finalize(&mut self) -> Result<()> {
        (**self).finalize()
    }
    fn abort(&mut self) {
        (**self).abort()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Created,
    Started,
    Writing,
    /// `finish` has been called; input is closed.
    Finished,
    Failed,
}

/// One output file. Not reusable after [`finish`](Self::finish).
pub struct VideoEncoder<S: EncoderSink + 'static> {
    settings: OutputSettings,
    path: PathBuf,
    sink: Option<S>,
    ready: Arc<ReadySignal>,
    ready_timeout: Duration,
    frame_duration: MediaTime,
    frames_written: u64,
    state: EncoderState,
}

impl<S: EncoderSink + 'static> VideoEncoder<S> {
    pub fn new(settings: OutputSettings, sink: S) -> Result<Self> {
        settings.validate()?;
        let frame_duration = frame_duration(settings.fps)?;
        let path = settings.output_path();
        Ok(Self {
            settings,
            path,
            sink: Some(sink),
            ready: Arc::new(ReadySignal::default()),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            frame_duration,
            frames_written: 0,
            state: EncoderState::Created,
        })
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Presentation time of the next frame.
    pub fn next_pts(&self) -> MediaTime {
        self.frame_duration.multiply(self.frames_written)
    }

    /// Remove any stale output, check the path is writable and open the sink.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EncoderState::Created {
            return Err(EncoderError::InvalidState { op: "start", state: self.state });
        }
        if let Err(e) = self.prepare_output() {
            self.fail();
            return Err(e);
        }

        let Some(sink) = self.sink.as_mut() else {
            self.fail();
            return Err(EncoderError::Pipeline("sink already released".into()));
        };
        if let Err(e) = sink.open(&self.settings, &self.path, Arc::clone(&self.ready)) {
            log::error!("failed to open encoder sink for {}: {}", self.path.display(), e);
            self.fail();
            return Err(e);
        }

        log::debug!(
            "encoder started: {} {}x{}@{} {:?}",
            self.path.display(),
            self.settings.width,
            self.settings.height,
            self.settings.fps,
            self.settings.codec
        );
        self.state = EncoderState::Started;
        Ok(())
    }

    fn prepare_output(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| EncoderError::io(dir, e))?;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed stale {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(EncoderError::io(&self.path, e)),
        }
        // The sink creates the real file; make sure it will be allowed to.
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| EncoderError::io(&self.path, e))?;
        fs::remove_file(&self.path).map_err(|e| EncoderError::io(&self.path, e))
    }

    /// Append the next frame. Blocks (bounded by the ready timeout) while the
    /// sink reports it cannot take more data. Any error fails the encoder.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<()> {
        if !matches!(self.state, EncoderState::Started | EncoderState::Writing) {
            return Err(EncoderError::InvalidState { op: "add_frame", state: self.state });
        }
        if let Err(e) = self.check_frame(frame) {
            self.fail();
            return Err(e);
        }
        if !self.ready.wait_ready(self.ready_timeout) {
            log::error!("encoder sink stalled for {:?}", self.ready_timeout);
            self.fail();
            return Err(EncoderError::SinkStalled(self.ready_timeout));
        }

        let pts = self.next_pts();
        let result = match self.sink.as_mut() {
            Some(sink) => sink.append(frame, pts, self.frame_duration),
            None => Err(EncoderError::Pipeline("sink already released".into())),
        };
        if let Err(e) = result {
            log::error!("failed to append frame {}: {}", self.frames_written, e);
            self.fail();
            return Err(e);
        }

        log::trace!("frame {} at {}", self.frames_written, pts);
        self.frames_written += 1;
        self.state = EncoderState::Writing;
        Ok(())
    }

    fn check_frame(&self, frame: &Frame) -> Result<()> {
        frame.expect_format(PixelFormat::Rgba8)?;
        let expected = (self.settings.width, self.settings.height);
        if frame.dimensions() != expected {
            return Err(EncoderError::FrameSize { expected, actual: frame.dimensions() });
        }
        Ok(())
    }

    /// Abandon the file: abort the sink and remove anything written so far.
    pub fn cancel(&mut self) {
        if matches!(self.state, EncoderState::Started | EncoderState::Writing) {
            log::warn!("encoder for {} cancelled", self.path.display());
            self.fail();
        }
    }

    fn fail(&mut self) {
        self.state = EncoderState::Failed;
        if let Some(mut sink) = self.sink.take() {
            sink.abort();
        }
        remove_partial(&self.path);
    }

    /// Close input and finalize on a background thread. `on_complete` runs
    /// exactly once, on that thread, with the output path or `None`.
    ///
    /// A second call is rejected and never reaches its callback.
    pub fn finish<F>(&mut self, on_complete: F) -> Result<()>
    where
        F: FnOnce(Option<PathBuf>) + Send + 'static,
    {
        if self.state == EncoderState::Finished {
            return Err(EncoderError::InvalidState { op: "finish", state: self.state });
        }
        let previous = std::mem::replace(&mut self.state, EncoderState::Finished);
        let sink = self.sink.take();
        let path = self.path.clone();
        let frames = self.frames_written;

        thread::Builder::new()
            .name("stylecam-encoder-finalize".into())
            .spawn(move || {
                let outcome = finalize(previous, sink, frames);
                match outcome {
                    Ok(()) => {
                        log::info!("wrote {} frames to {}", frames, path.display());
                        on_complete(Some(path));
                    }
                    Err(e) => {
                        log::error!("encoding {} failed: {}", path.display(), e);
                        remove_partial(&path);
                        on_complete(None);
                    }
                }
            })
            .map_err(|e| EncoderError::Pipeline(format!("Failed to spawn finalize thread: {e}")))?;
        Ok(())
    }
}

fn finalize<S: EncoderSink>(previous: EncoderState, sink: Option<S>, frames: u64) -> Result<()> {
    match (previous, sink) {
        (EncoderState::Writing, Some(mut sink)) if frames > 0 => sink.finalize(),
        (_, Some(mut sink)) => {
            sink.abort();
            Err(EncoderError::Pipeline("no frames were written".into()))
        }
        (state, None) => Err(EncoderError::InvalidState { op: "finalize", state }),
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("removed partial {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("could not remove partial {}: {}", path.display(), e),
    }
}

impl<S: EncoderSink + 'static> Drop for VideoEncoder<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}
