use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use stylecam_camera::testing::{SourceProbe, SyntheticCamera};
use stylecam_camera::{CameraPosition, CameraSource, CaptureSession, Frame, PixelBuffer};
use stylecam_effects::{EffectKind, EffectRegistry, FrameTransform, TransformError};
use stylecam_encoder::testing::{MemorySink, MemorySinkHandle};
use stylecam_encoder::EncoderSink;
use stylecam_pipeline::{SinkFactory, StyleCam, StyleCamConfig, StyleCamDelegate};

const WORK: u32 = 32;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Recorder {
    previews: AtomicUsize,
    photos: AtomicUsize,
    videos: Sender<Option<PathBuf>>,
}

impl StyleCamDelegate for Recorder {
    fn on_preview_frame_ready(&self, _: &Frame) {
        self.previews.fetch_add(1, Ordering::Relaxed);
    }
    fn on_photo_ready(&self, _: &Frame) {
        self.photos.fetch_add(1, Ordering::Relaxed);
    }
    fn on_video_ready(&self, path: &Path) {
        let _ = self.videos.send(Some(path.to_path_buf()));
    }
    fn on_video_failed(&self) {
        let _ = self.videos.send(None);
    }
}

struct Harness {
    cam: StyleCam,
    recorder: Arc<Recorder>,
    videos: Receiver<Option<PathBuf>>,
    sinks: Arc<Mutex<Vec<MemorySinkHandle>>>,
    back: SourceProbe,
    front: SourceProbe,
    output: PathBuf,
    _dir: tempfile::TempDir,
}

fn config(dir: &Path) -> StyleCamConfig {
    let mut config = StyleCamConfig::default();
    config.camera.width = 64;
    config.camera.height = 48;
    config.working_size = (WORK, WORK);
    config.pool_capacity = 256;
    config.output.width = WORK;
    config.output.height = WORK;
    config.output.directory = Some(dir.to_path_buf());
    config.encoder_ready_timeout_ms = 2_000;
    config
}

fn harness(back: SyntheticCamera, front: SyntheticCamera, effects: EffectRegistry, failing_sink: bool) -> Harness {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let output = config.output.output_path();

    let (back_probe, front_probe) = (back.probe(), front.probe());
    let sources: Vec<Box<dyn CameraSource>> = vec![Box::new(back), Box::new(front)];
    let session = CaptureSession::new(sources).unwrap();

    let sinks = Arc::new(Mutex::new(Vec::new()));
    let factory: SinkFactory = {
        let sinks = Arc::clone(&sinks);
        Arc::new(move || {
            let sink = if failing_sink { MemorySink::new().failing_finalize() } else { MemorySink::new() };
            sinks.lock().push(sink.handle());
            Box::new(sink) as Box<dyn EncoderSink>
        })
    };

    let (tx, videos) = unbounded();
    let recorder = Arc::new(Recorder { previews: AtomicUsize::new(0), photos: AtomicUsize::new(0), videos: tx });
    let cam = StyleCam::new(config, session, effects, factory, recorder.clone()).unwrap();

    Harness { cam, recorder, videos, sinks, back: back_probe, front: front_probe, output, _dir: dir }
}

fn cameras() -> (SyntheticCamera, SyntheticCamera) {
    (
        SyntheticCamera::new(CameraPosition::Back, 64, 48),
        SyntheticCamera::new(CameraPosition::Front, 64, 48),
    )
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn counting(calls: Arc<AtomicUsize>) -> Arc<dyn FrameTransform> {
    Arc::new(move |f: &Frame| -> Result<Option<Frame>, TransformError> {
        calls.fetch_add(1, Ordering::Relaxed);
        let inverted = f.buffer.chunks_exact(4).flat_map(|px| [255 - px[0], 255 - px[1], 255 - px[2], 255]).collect();
        Ok(Some(Frame::rgba(f.width, f.height, PixelBuffer::from_vec(inverted))?))
    })
}

#[test]
fn stopping_an_empty_recording_creates_no_job() {
    let (back, front) = cameras();
    let h = harness(back, front, EffectRegistry::new(), false);

    h.cam.set_recording_enabled(true);
    assert!(h.cam.is_recording());
    h.cam.set_recording_enabled(false);

    assert_eq!(h.cam.jobs_submitted(), 0);
    assert!(h.videos.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(h.sinks.lock().is_empty());
    assert!(!h.output.exists());
}

#[test]
fn ninety_recorded_frames_make_a_three_second_video() {
    let (back, front) = cameras();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut effects = EffectRegistry::new();
    effects.register(EffectKind::Anime, counting(Arc::clone(&calls)));
    let h = harness(back.with_frame_limit(90), front, effects, false);

    h.cam.set_effect(EffectKind::Anime);
    h.cam.set_recording_enabled(true);
    h.cam.start_capture().unwrap();
    wait_until("90 frames", || h.cam.capture_stats().processed == 90);
    h.cam.set_recording_enabled(false);
    assert_eq!(h.cam.jobs_submitted(), 1);

    let path = h.videos.recv_timeout(Duration::from_secs(10)).unwrap().expect("video should be written");
    assert_eq!(path, h.output);
    assert!(path.exists());

    let sinks = h.sinks.lock();
    assert_eq!(sinks.len(), 1);
    let log = sinks[0].log();
    assert!(log.finalized);
    assert_eq!(log.frame_count(), 90);
    assert!(log.sizes.iter().all(|&size| size == (WORK, WORK)));
    let seconds = log.duration().unwrap().as_secs_f64();
    assert!((seconds - 3.0).abs() <= 1.0 / 30.0, "duration {seconds}");

    // Styled once per recorded frame, at stop time only.
    assert_eq!(calls.load(Ordering::Relaxed), 90);
    assert!(h.recorder.previews.load(Ordering::Relaxed) > 0);
}

#[test]
fn failed_encode_is_reported_and_leaves_no_file() {
    let (back, front) = cameras();
    let h = harness(back, front, EffectRegistry::new(), true);

    h.cam.set_recording_enabled(true);
    for _ in 0..5 {
        let raw = SyntheticCamera::nv12_frame(64, 48, 90, 128, 128).unwrap();
        assert!(h.cam.deliver_frame(raw).is_some());
    }
    h.cam.set_recording_enabled(false);

    assert_eq!(h.videos.recv_timeout(Duration::from_secs(10)).unwrap(), None);
    assert!(!h.output.exists());
}

#[test]
fn noise_still_is_the_unmodified_working_frame() {
    let (back, front) = cameras();
    let mut effects = EffectRegistry::new();
    effects.register(EffectKind::Comics, counting(Arc::new(AtomicUsize::new(0))));
    let h = harness(back, front, effects, false);

    assert!(h.cam.capture_still_frame().is_none());

    let raw = SyntheticCamera::nv12_frame(64, 48, 128, 128, 128).unwrap();
    let working = h.cam.deliver_frame(raw).unwrap();
    assert_eq!(working.dimensions(), (WORK, WORK));

    h.cam.set_effect(EffectKind::Noise);
    let still = h.cam.capture_still_frame().unwrap();
    assert_eq!(still.dimensions(), (WORK, WORK));
    assert_eq!(still.buffer.as_slice(), working.buffer.as_slice());

    h.cam.set_effect(EffectKind::Comics);
    let styled = h.cam.capture_still_frame().unwrap();
    assert_ne!(styled.buffer.as_slice(), working.buffer.as_slice());
    assert_eq!(h.recorder.photos.load(Ordering::Relaxed), 2);

    let png = h.output.with_file_name("still.png");
    h.cam.export_still(&styled, &png).unwrap();
    assert!(std::fs::metadata(png).unwrap().len() > 0);
}

#[test]
fn rapid_double_switch_leaves_one_active_input() {
    let (back, front) = cameras();
    let h = harness(
        back.with_interval(Duration::from_millis(1)),
        front.with_interval(Duration::from_millis(1)),
        EffectRegistry::new(),
        false,
    );
    h.cam.start_capture().unwrap();
    wait_until("first frame", || h.cam.capture_stats().processed > 0);

    assert_eq!(h.cam.switch_camera_input().unwrap(), CameraPosition::Front);
    assert_eq!(h.cam.switch_camera_input().unwrap(), CameraPosition::Back);

    assert_eq!(h.cam.active_camera(), Some(CameraPosition::Back));
    assert!(h.back.is_running());
    assert!(!h.front.is_running());
    assert_eq!((h.front.starts(), h.front.stops()), (1, 1));
    assert_eq!((h.back.starts(), h.back.stops()), (2, 1));

    let before = h.cam.capture_stats().processed;
    wait_until("frames after switching", || h.cam.capture_stats().processed > before);
}

#[tokio::test(flavor = "multi_thread")]
async fn ready_signal_fires_on_first_frame() {
    let (back, front) = cameras();
    let h = harness(back.with_interval(Duration::from_millis(2)), front, EffectRegistry::new(), false);

    let ready = h.cam.take_ready_signal().expect("signal available once");
    assert!(h.cam.take_ready_signal().is_none());

    h.cam.start_capture().unwrap();
    tokio::time::timeout(Duration::from_secs(5), ready)
        .await
        .expect("camera should become ready")
        .unwrap();
    assert!(h.cam.capture_stats().processed >= 1);
}

#[test]
fn stalled_camera_can_still_be_switched_away_from() {
    let (back, front) = cameras();
    let h = harness(back.stalled(), front.with_interval(Duration::from_millis(1)), EffectRegistry::new(), false);
    h.cam.start_capture().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.cam.capture_stats().processed, 0);

    let started = Instant::now();
    assert_eq!(h.cam.switch_camera_input().unwrap(), CameraPosition::Front);
    assert!(started.elapsed() < Duration::from_secs(2), "switch took {:?}", started.elapsed());
    assert_eq!(h.cam.active_camera(), Some(CameraPosition::Front));
    wait_until("frames from the front camera", || h.cam.capture_stats().processed > 0);
}

#[test]
fn shutdown_does_not_hang_on_a_stalled_camera() {
    let (back, front) = cameras();
    let h = harness(back.stalled(), front, EffectRegistry::new(), false);
    h.cam.start_capture().unwrap();
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    drop(h);
    assert!(started.elapsed() < Duration::from_secs(2), "shutdown took {:?}", started.elapsed());
}
