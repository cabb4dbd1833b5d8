//! Per-frame processing on the capture context.
//!
//! convert → resize → (live effect) → record → publish. Nothing here blocks
//! on the preview or the encoder, and no per-frame error escapes: bad frames
//! are dropped, failed effects fall back to the unstyled frame.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use stylecam_camera::Frame;
use stylecam_effects::{EffectKind, EffectRegistry};
use stylecam_preprocess::{PreprocessError, Preprocessor};
use tokio::sync::oneshot;

use crate::recording::RecordingBuffer;
use crate::StyleCamDelegate;

/// Settings the UI changes while frames are flowing. Both are read once per
/// frame on the capture thread, so neither takes a lock.
pub struct Controls {
    effect: AtomicU8,
    realtime_preview: AtomicBool,
}

impl Controls {
    pub fn new(effect: EffectKind, realtime_preview: bool) -> Self {
        Self { effect: AtomicU8::new(effect_index(effect)), realtime_preview: AtomicBool::new(realtime_preview) }
    }

    pub fn effect(&self) -> EffectKind {
        let index = usize::from(self.effect.load(Ordering::Acquire));
        EffectKind::ALL.get(index).copied().unwrap_or_default()
    }

    pub fn set_effect(&self, effect: EffectKind) {
        self.effect.store(effect_index(effect), Ordering::Release);
    }

    pub fn realtime_preview(&self) -> bool {
        self.realtime_preview.load(Ordering::Acquire)
    }

    pub fn set_realtime_preview(&self, enabled: bool) {
        self.realtime_preview.store(enabled, Ordering::Release);
    }
}

fn effect_index(effect: EffectKind) -> u8 {
    EffectKind::ALL.iter().position(|&kind| kind == effect).unwrap_or(0) as u8
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub processed: u64,
    pub skipped: u64,
    pub preview_dropped: u64,
}

pub struct CapturePipeline {
    preprocessor: Preprocessor,
    effects: Arc<EffectRegistry>,
    controls: Arc<Controls>,
    recording: Arc<RecordingBuffer>,
    delegate: Arc<dyn StyleCamDelegate>,
    preview_tx: Sender<Frame>,
    latest: Mutex<Option<Frame>>,
    ready_tx: Mutex<Option<oneshot::Sender<()>>>,
    allocation_failures: AtomicU32,
    allocation_failure_limit: u32,
    processed: AtomicU64,
    skipped: AtomicU64,
    preview_dropped: AtomicU64,
}

impl CapturePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preprocessor: Preprocessor,
        effects: Arc<EffectRegistry>,
        controls: Arc<Controls>,
        recording: Arc<RecordingBuffer>,
        delegate: Arc<dyn StyleCamDelegate>,
        preview_tx: Sender<Frame>,
        ready_tx: oneshot::Sender<()>,
        allocation_failure_limit: u32,
    ) -> Self {
        Self {
            preprocessor,
            effects,
            controls,
            recording,
            delegate,
            preview_tx,
            latest: Mutex::new(None),
            ready_tx: Mutex::new(Some(ready_tx)),
            allocation_failures: AtomicU32::new(0),
            allocation_failure_limit,
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            preview_dropped: AtomicU64::new(0),
        }
    }

    /// Run one raw frame through the pipeline. Returns the frame handed to the
    /// preview, or `None` if the frame was dropped.
    pub fn process(&self, raw: Frame) -> Option<Frame> {
        let working = match self.preprocessor.run(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.skip(&e);
                return None;
            }
        };
        drop(raw);
        self.allocation_failures.store(0, Ordering::Release);

        let shown = if self.controls.realtime_preview() {
            self.effects
                .apply(self.controls.effect(), &working)
                .unwrap_or_else(|| working.clone())
        } else {
            working.clone()
        };

        // Recorded frames are styled at stop time, never here, and live in
        // their own storage so a long recording cannot drain the working pool.
        if self.recording.is_recording() {
            match working.detach() {
                Ok(copy) => {
                    if self.recording.append(copy) {
                        log::trace!("recorded frame ({} buffered)", self.recording.len());
                    }
                }
                Err(e) => log::error!("cannot keep frame for recording: {e}"),
            }
        }
        *self.latest.lock() = Some(working);
        self.signal_ready();

        match self.preview_tx.try_send(shown.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.preview_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("preview busy, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => log::trace!("no preview consumer"),
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        Some(shown)
    }

    fn skip(&self, error: &PreprocessError) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        if !error.is_allocation() {
            log::warn!("dropping frame: {error}");
            return;
        }
        let failures = self.allocation_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures == self.allocation_failure_limit {
            log::error!("{failures} consecutive buffer allocation failures: {error}");
            self.delegate.on_resource_exhausted(failures);
        } else {
            log::warn!("dropping frame, no buffer available: {error}");
        }
    }

    fn signal_ready(&self) {
        if let Some(tx) = self.ready_tx.lock().take() {
            log::info!("first frame processed, camera ready");
            // The receiver may already be gone; nothing to tell then.
            let _ = tx.send(());
        }
    }

    /// Most recent working-resolution frame, before any effect.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest.lock().clone()
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            preview_dropped: self.preview_dropped.load(Ordering::Relaxed),
        }
    }
}
