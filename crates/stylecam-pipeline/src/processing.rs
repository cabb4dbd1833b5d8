//! Record-stop worker: style every buffered frame, then encode them.
//!
//! Jobs run one at a time on a dedicated thread; each job waits for its
//! encoder's completion callback before the next starts, since they all
//! write the same output path.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use stylecam_camera::Frame;
use stylecam_effects::{EffectKind, EffectRegistry};
use stylecam_encoder::{EncoderSink, OutputSettings, VideoEncoder};
use stylecam_preprocess::{FrameResizer, PreprocessError};

use crate::{PipelineError, SinkFactory, StyleCamDelegate};

/// One stop-recording request.
pub struct RecordingJob {
    pub frames: Vec<Frame>,
    /// Effect selected when recording stopped.
    pub effect: EffectKind,
    pub settings: OutputSettings,
}

pub(crate) struct ProcessingWorker {
    jobs: Option<Sender<RecordingJob>>,
    handle: Option<JoinHandle<()>>,
}

struct JobRunner {
    effects: Arc<EffectRegistry>,
    resizer: FrameResizer,
    sinks: SinkFactory,
    delegate: Arc<dyn StyleCamDelegate>,
    ready_timeout: Duration,
}

impl ProcessingWorker {
    pub(crate) fn spawn(
        effects: Arc<EffectRegistry>,
        resizer: FrameResizer,
        sinks: SinkFactory,
        delegate: Arc<dyn StyleCamDelegate>,
        ready_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let (tx, rx) = unbounded::<RecordingJob>();
        let runner = JobRunner { effects, resizer, sinks, delegate, ready_timeout };
        let handle = thread::Builder::new()
            .name("stylecam-processing".into())
            .spawn(move || runner.run(rx))
            .map_err(PipelineError::Thread)?;
        Ok(Self { jobs: Some(tx), handle: Some(handle) })
    }

    pub(crate) fn submit(&self, job: RecordingJob) -> Result<(), RecordingJob> {
        match &self.jobs {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }
}

impl Drop for ProcessingWorker {
    fn drop(&mut self) {
        // Closing the queue lets queued jobs finish, then the thread exits.
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("processing thread panicked");
            }
        }
    }
}

impl JobRunner {
    fn run(self, jobs: Receiver<RecordingJob>) {
        while let Ok(job) = jobs.recv() {
            let started = Instant::now();
            let frames = job.frames.len();
            log::info!("encoding {} frames with {} effect", frames, job.effect);
            match self.run_job(job) {
                Some(path) => {
                    log::info!("video ready at {} after {:?}", path.display(), started.elapsed());
                    self.delegate.on_video_ready(&path);
                }
                None => {
                    log::error!("recording of {frames} frames could not be encoded");
                    self.delegate.on_video_failed();
                }
            }
        }
        log::debug!("processing thread shutting down");
    }

    fn run_job(&self, job: RecordingJob) -> Option<PathBuf> {
        let sink = (self.sinks)();
        let mut encoder = match VideoEncoder::new(job.settings.clone(), sink) {
            Ok(encoder) => encoder.with_ready_timeout(self.ready_timeout),
            Err(e) => {
                log::error!("cannot create encoder: {e}");
                return None;
            }
        };

        if let Err(e) = self.write_frames(&mut encoder, job) {
            log::error!("encoding aborted: {e}");
            encoder.cancel();
        }

        let (tx, rx) = bounded(1);
        if let Err(e) = encoder.finish(move |path| {
            // Receiver outlives this callback; ignore if it does not.
            let _ = tx.send(path);
        }) {
            log::error!("cannot finish encoder: {e}");
            return None;
        }
        rx.recv().ok().flatten()
    }

    fn write_frames(
        &self,
        encoder: &mut VideoEncoder<Box<dyn EncoderSink>>,
        job: RecordingJob,
    ) -> Result<(), PipelineError> {
        encoder.start()?;
        let target = (job.settings.width, job.settings.height);
        for (index, frame) in job.frames.into_iter().enumerate() {
            let styled = self.effects.apply(job.effect, &frame);
            // Styled frame first, then the recorded one unchanged.
            let sized = styled.iter().chain(std::iter::once(&frame)).find_map(|candidate| {
                match self.fit(candidate, target) {
                    Ok(sized) => Some(sized),
                    Err(e) => {
                        log::warn!("frame {index}: cannot resize to {}x{}: {e}", target.0, target.1);
                        None
                    }
                }
            });
            match sized {
                Some(sized) => encoder.add_frame(&sized)?,
                None => log::warn!("frame {index} skipped"),
            }
        }
        Ok(())
    }

    fn fit(&self, frame: &Frame, (width, height): (u32, u32)) -> Result<Frame, PreprocessError> {
        if frame.dimensions() == (width, height) {
            Ok(frame.clone())
        } else {
            self.resizer.resize(frame, width, height)
        }
    }
}
