//! StyleCam record demo
//!
//! Opens the back (or front) camera, previews for a moment, takes a styled
//! still, records a few seconds, then waits for the encoded video.
//!
//! Usage: RUST_LOG=info cargo run --bin record_demo -- --effect anime --seconds 3

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use stylecam_camera::{CameraPosition, Frame};
use stylecam_effects::EffectKind;
use stylecam_pipeline::{StyleCam, StyleCamConfig, StyleCamDelegate};

#[derive(Parser)]
struct CliArgs {
    /// JSON config; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "comics")]
    effect: EffectKind,

    #[arg(long, default_value = "3")]
    seconds: u64,

    /// Start on the front camera
    #[arg(long)]
    front: bool,

    /// Style the live preview too
    #[arg(long)]
    realtime: bool,

    /// Where to write the still photo
    #[arg(long, default_value = "still.png")]
    still: PathBuf,
}

struct ConsoleDelegate {
    previews: AtomicU64,
    video: Sender<Option<PathBuf>>,
}

impl StyleCamDelegate for ConsoleDelegate {
    fn on_preview_frame_ready(&self, frame: &Frame) {
        let n = self.previews.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 30 == 0 {
            log::info!("preview frame {n} ({}x{})", frame.width, frame.height);
        }
    }

    fn on_photo_ready(&self, frame: &Frame) {
        log::info!("photo ready ({}x{})", frame.width, frame.height);
    }

    fn on_video_ready(&self, path: &Path) {
        let _ = self.video.send(Some(path.to_path_buf()));
    }

    fn on_video_failed(&self) {
        let _ = self.video.send(None);
    }

    fn on_resource_exhausted(&self, consecutive_failures: u32) {
        log::error!("out of frame buffers ({consecutive_failures} failures in a row)");
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => StyleCamConfig::from_json_file(path)?,
        None => StyleCamConfig::default(),
    };
    config.effect = args.effect;
    config.realtime_preview = args.realtime;
    if args.front {
        config.initial_camera = CameraPosition::Front;
    }
    let fps = u64::from(config.camera.fps);

    let (tx, video) = bounded(1);
    let delegate = Arc::new(ConsoleDelegate { previews: AtomicU64::new(0), video: tx });
    let cam = StyleCam::with_devices(config, delegate).context("opening cameras")?;

    let ready = cam.take_ready_signal().context("ready signal already taken")?;
    cam.start_capture()?;
    ready.blocking_recv().context("capture stopped before the first frame")?;
    log::info!("camera ready, effect {}", cam.effect());

    thread::sleep(Duration::from_millis(500));
    let photo = cam.capture_still_frame().context("no frame to photograph")?;
    cam.export_still(&photo, &args.still)?;

    cam.set_recording_enabled(true);
    thread::sleep(Duration::from_secs(args.seconds));
    cam.set_recording_enabled(false);
    log::info!(
        "recorded ~{} frames, waiting for encoder",
        args.seconds * fps
    );

    match video.recv_timeout(Duration::from_secs(120)) {
        Ok(Some(path)) => println!("video written to {}", path.display()),
        Ok(None) => bail!("encoding failed"),
        Err(_) => bail!("timed out waiting for the encoder"),
    }

    let stats = cam.capture_stats();
    println!(
        "processed {} frames, skipped {}, preview dropped {}",
        stats.processed, stats.skipped, stats.preview_dropped
    );
    Ok(())
}
