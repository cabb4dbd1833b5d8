// stylecam-pipeline/src/lib.rs
// ============================================================
// stylecam-pipeline  –  Camera → preview / record → video
// ------------------------------------------------------------
// Threads
//   * capture     – pulls frames from the CaptureSession and
//                   runs CapturePipeline::process
//   * render      – hands preview frames to the delegate
//   * processing  – styles + encodes recordings at stop time
// ------------------------------------------------------------
// Public API
//   * StyleCam                    – facade used by the UI
//   * StyleCamDelegate            – preview / photo / video callbacks
//   * StyleCamConfig              – JSON-loadable settings
// ============================================================

//! StyleCam – pipeline and facade
//!
//! [`StyleCam`] wires a [`CaptureSession`] to the preprocessing, effect and
//! encoding crates. The UI drives it with a handful of calls
//! (`start_capture`, `set_effect`, `set_recording_enabled`, ...) and gets
//! results back through a [`StyleCamDelegate`].

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver};
use parking_lot::Mutex;
use stylecam_camera::{BufferPool, Camera, CameraError, CameraPosition, CameraSource, CaptureSession, Frame};
use stylecam_effects::{EffectKind, EffectRegistry};
use stylecam_encoder::{EncoderError, EncoderSink, GstSink};
use stylecam_preprocess::{export, FrameResizer, PreprocessError, Preprocessor};
use thiserror::Error;
use tokio::sync::oneshot;

pub mod capture;
pub mod config;
pub mod processing;
pub mod recording;

pub use capture::{CapturePipeline, CaptureStats, Controls};
pub use config::StyleCamConfig;
pub use processing::RecordingJob;
pub use recording::RecordingBuffer;

use processing::ProcessingWorker;

/// Preview frames in flight between capture and render.
const PREVIEW_DEPTH: usize = 2;
/// Pause after a failed frame pull before trying again.
const CAPTURE_BACKOFF: Duration = Duration::from_millis(20);
/// Longest a single frame pull may hold the session lock.
const FRAME_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to spawn thread: {0}")]
    Thread(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Callbacks into the UI. Preview frames arrive on the render thread,
/// video results on the processing thread.
pub trait StyleCamDelegate: Send + Sync {
    fn on_preview_frame_ready(&self, frame: &Frame);
    fn on_photo_ready(&self, frame: &Frame);
    fn on_video_ready(&self, path: &Path);
    fn on_video_failed(&self) {}
    /// `consecutive_failures` buffer allocations in a row have failed.
    fn on_resource_exhausted(&self, consecutive_failures: u32) {
        let _ = consecutive_failures;
    }
}

/// Builds a fresh encoder backend per recording.
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn EncoderSink> + Send + Sync>;

pub struct StyleCam {
    config: StyleCamConfig,
    session: Arc<CaptureSession>,
    pipeline: Arc<CapturePipeline>,
    controls: Arc<Controls>,
    recording: Arc<RecordingBuffer>,
    delegate: Arc<dyn StyleCamDelegate>,
    worker: ProcessingWorker,
    jobs_submitted: AtomicU64,
    ready_rx: Mutex<Option<oneshot::Receiver<()>>>,
    shutdown: Arc<AtomicBool>,
    capture: Mutex<Option<JoinHandle<()>>>,
    render_stop: Option<crossbeam_channel::Sender<()>>,
    render: Option<JoinHandle<()>>,
}

impl StyleCam {
    pub fn new(
        config: StyleCamConfig,
        session: CaptureSession,
        effects: EffectRegistry,
        sinks: SinkFactory,
        delegate: Arc<dyn StyleCamDelegate>,
    ) -> Result<Self> {
        config.validate().map_err(|e| PipelineError::Config(format!("{e:#}")))?;

        let (work_w, work_h) = config.working_size;
        let sensor_pool = BufferPool::for_frames(config.camera.width, config.camera.height, 4, config.sensor_pool_capacity);
        let working_pool = BufferPool::for_frames(work_w, work_h, 4, config.pool_capacity);
        let preprocessor = Preprocessor::with_pools(
            work_w,
            work_h,
            config.conversion_matrix(),
            sensor_pool,
            working_pool,
            config.resize_filter,
        );

        let effects = Arc::new(effects);
        let controls = Arc::new(Controls::new(config.effect, config.realtime_preview));
        let recording = Arc::new(RecordingBuffer::new());
        let (preview_tx, preview_rx) = bounded(PREVIEW_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();

        let pipeline = Arc::new(CapturePipeline::new(
            preprocessor,
            Arc::clone(&effects),
            Arc::clone(&controls),
            Arc::clone(&recording),
            Arc::clone(&delegate),
            preview_tx,
            ready_tx,
            config.allocation_failure_limit,
        ));

        let worker = ProcessingWorker::spawn(
            effects,
            FrameResizer::new(config.resize_filter),
            sinks,
            Arc::clone(&delegate),
            config.encoder_ready_timeout(),
        )?;

        let (render_stop, stop_rx) = bounded::<()>(0);
        let render = spawn_renderer(preview_rx, stop_rx, Arc::clone(&delegate))?;

        Ok(Self {
            config,
            session: Arc::new(session),
            pipeline,
            controls,
            recording,
            delegate,
            worker,
            jobs_submitted: AtomicU64::new(0),
            ready_rx: Mutex::new(Some(ready_rx)),
            shutdown: Arc::new(AtomicBool::new(false)),
            capture: Mutex::new(None),
            render_stop: Some(render_stop),
            render: Some(render),
        })
    }

    /// GStreamer cameras for both positions, ONNX models from the config, and
    /// mp4 output through GStreamer.
    pub fn with_devices(config: StyleCamConfig, delegate: Arc<dyn StyleCamDelegate>) -> Result<Self> {
        let sources: Vec<Box<dyn CameraSource>> = vec![
            Box::new(Camera::new(CameraPosition::Back, &config.camera)?),
            Box::new(Camera::new(CameraPosition::Front, &config.camera)?),
        ];
        let session = CaptureSession::new(sources)?;
        let effects = EffectRegistry::from_config(&config.models);
        let sinks: SinkFactory = Arc::new(|| Box::new(GstSink::new()) as Box<dyn EncoderSink>);
        Self::new(config, session, effects, sinks, delegate)
    }

    pub fn config(&self) -> &StyleCamConfig {
        &self.config
    }

    /// Start the initial camera and the capture thread. Calling it again
    /// while capture is running does nothing.
    pub fn start_capture(&self) -> Result<()> {
        let mut capture = self.capture.lock();
        if capture.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        if self.session.active_input().is_none() {
            self.session.start(self.config.initial_camera)?;
        }

        let session = Arc::clone(&self.session);
        let pipeline = Arc::clone(&self.pipeline);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::Builder::new()
            .name("stylecam-capture".into())
            .spawn(move || capture_loop(&session, &pipeline, &shutdown))
            .map_err(PipelineError::Thread)?;
        *capture = Some(handle);
        log::info!("capture started on {:?}", self.session.active_input());
        Ok(())
    }

    /// Swap front/back. On failure the previous camera stays active.
    pub fn switch_camera_input(&self) -> Result<CameraPosition> {
        Ok(self.session.switch_input()?)
    }

    pub fn active_camera(&self) -> Option<CameraPosition> {
        self.session.active_input()
    }

    pub fn set_effect(&self, effect: EffectKind) {
        if !self.pipeline.effects().is_available(effect) && effect != EffectKind::Noise {
            log::warn!("{effect} has no model loaded; frames will pass through");
        }
        log::info!("effect set to {effect}");
        self.controls.set_effect(effect);
    }

    pub fn effect(&self) -> EffectKind {
        self.controls.effect()
    }

    pub fn set_realtime_preview_enabled(&self, enabled: bool) {
        log::info!("realtime preview {}", if enabled { "on" } else { "off" });
        self.controls.set_realtime_preview(enabled);
    }

    /// Turning recording off hands everything recorded to the processing
    /// thread; the result arrives through `on_video_ready`/`on_video_failed`.
    pub fn set_recording_enabled(&self, enabled: bool) {
        if enabled {
            if self.recording.start() {
                log::info!("recording started");
            }
            return;
        }

        let frames = self.recording.stop_and_drain();
        if frames.is_empty() {
            log::info!("recording stopped with no frames, nothing to encode");
            return;
        }
        log::info!("recording stopped, {} frames queued for encoding", frames.len());
        let job = RecordingJob { frames, effect: self.controls.effect(), settings: self.config.output.clone() };
        match self.worker.submit(job) {
            Ok(()) => {
                self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(job) => {
                log::error!("processing thread gone, dropping {} recorded frames", job.frames.len());
                self.delegate.on_video_failed();
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    /// Encoding jobs handed to the processing thread so far.
    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    /// The latest working frame with the current effect applied (unchanged
    /// for `noise` or when the effect fails). Also sent to `on_photo_ready`.
    pub fn capture_still_frame(&self) -> Option<Frame> {
        let working = self.pipeline.latest_frame()?;
        let photo = self
            .pipeline
            .effects()
            .apply(self.controls.effect(), &working)
            .unwrap_or(working);
        self.delegate.on_photo_ready(&photo);
        Some(photo)
    }

    /// Letterbox `photo` into the output canvas and write it as PNG.
    pub fn export_still(&self, photo: &Frame, path: &Path) -> Result<()> {
        let (w, h) = (self.config.output.width, self.config.output.height);
        export::save_png(photo, w, h, path)?;
        log::info!("photo saved to {}", path.display());
        Ok(())
    }

    /// Feed a raw frame directly, bypassing the capture thread.
    pub fn deliver_frame(&self, raw: Frame) -> Option<Frame> {
        self.pipeline.process(raw)
    }

    /// Resolves once the first frame has been processed. Available once.
    pub fn take_ready_signal(&self) -> Option<oneshot::Receiver<()>> {
        self.ready_rx.lock().take()
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.pipeline.stats()
    }
}

fn capture_loop(session: &CaptureSession, pipeline: &CapturePipeline, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Acquire) {
        match session.deliver_next(FRAME_TIMEOUT, |raw| {
            pipeline.process(raw);
        }) {
            Ok(()) => {}
            Err(CameraError::Timeout(waited)) => {
                log::debug!("no camera frame within {waited:?}");
            }
            Err(CameraError::EndOfStream) => {
                log::info!("camera stream ended");
                break;
            }
            Err(CameraError::NoActiveInput) => {
                log::debug!("no active camera input");
                thread::sleep(CAPTURE_BACKOFF);
            }
            Err(e) => {
                log::warn!("frame delivery failed: {e}");
                thread::sleep(CAPTURE_BACKOFF);
            }
        }
    }
    log::debug!("capture thread exiting");
}

fn spawn_renderer(
    preview: Receiver<Frame>,
    stop: Receiver<()>,
    delegate: Arc<dyn StyleCamDelegate>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stylecam-render".into())
        .spawn(move || loop {
            select! {
                recv(preview) -> frame => match frame {
                    Ok(frame) => delegate.on_preview_frame_ready(&frame),
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
            }
        })
        .map_err(PipelineError::Thread)
}

impl Drop for StyleCam {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.capture.lock().take() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
        self.render_stop = None;
        if let Some(handle) = self.render.take() {
            if handle.join().is_err() {
                log::error!("render thread panicked");
            }
        }
    }
}
