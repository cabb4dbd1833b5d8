//! Capture session: owns the camera inputs and serialises input switching
//! against frame delivery.
//!
//! Delivery ([`CaptureSession::deliver_next`]) and reconfiguration
//! ([`CaptureSession::begin_configuration`]) take the same lock, so no frame
//! callback ever runs while an input is being removed or added. Each pull
//! is bounded by a timeout, so a stalled camera holds the lock for at most
//! that long and a switch or shutdown still gets through.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::{CameraError, Frame, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Back,
    Front,
}

impl CameraPosition {
    pub fn opposite(self) -> Self {
        match self {
            CameraPosition::Back => CameraPosition::Front,
            CameraPosition::Front => CameraPosition::Back,
        }
    }
}

/// A camera that can be attached to a [`CaptureSession`].
pub trait CameraSource: Send {
    fn position(&self) -> CameraPosition;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn is_running(&self) -> bool;
    /// Wait up to `timeout` for the next raw frame; [`CameraError::Timeout`]
    /// when none arrives.
    fn next_frame(&mut self, timeout: Duration) -> Result<Frame>;
}

struct SessionInner {
    sources: Vec<Box<dyn CameraSource>>,
    active: Option<CameraPosition>,
}

impl SessionInner {
    fn source_mut(&mut self, position: CameraPosition) -> Result<&mut Box<dyn CameraSource>> {
        self.sources
            .iter_mut()
            .find(|s| s.position() == position)
            .ok_or(CameraError::UnknownInput(position))
    }
}

pub struct CaptureSession {
    inner: Mutex<SessionInner>,
}

impl CaptureSession {
    /// At most one source per position.
    pub fn new(sources: Vec<Box<dyn CameraSource>>) -> Result<Self> {
        for (i, source) in sources.iter().enumerate() {
            if sources[..i].iter().any(|s| s.position() == source.position()) {
                return Err(CameraError::Configuration(format!(
                    "duplicate {:?} input",
                    source.position()
                )));
            }
        }
        Ok(Self { inner: Mutex::new(SessionInner { sources, active: None }) })
    }

    /// Attach and start `position` if nothing is active yet.
    pub fn start(&self, position: CameraPosition) -> Result<()> {
        let mut config = self.begin_configuration();
        if config.active() == Some(position) {
            return Ok(());
        }
        if let Some(current) = config.active() {
            config.remove_input(current)?;
        }
        config.add_input(position)?;
        config.commit().map(|_| ())
    }

    pub fn active_input(&self) -> Option<CameraPosition> {
        self.inner.lock().active
    }

    /// Positions whose sources are currently running.
    pub fn running_inputs(&self) -> Vec<CameraPosition> {
        self.inner
            .lock()
            .sources
            .iter()
            .filter(|s| s.is_running())
            .map(|s| s.position())
            .collect()
    }

    /// Open an atomic configuration change. Frame delivery is blocked until
    /// the returned guard is committed or dropped; an uncommitted change is
    /// rolled back.
    pub fn begin_configuration(&self) -> SessionConfiguration<'_> {
        let guard = self.inner.lock();
        let original = guard.active;
        SessionConfiguration { guard, original, committed: false }
    }

    /// Swap the active input for the other camera. On failure the previous
    /// input stays active.
    pub fn switch_input(&self) -> Result<CameraPosition> {
        let mut config = self.begin_configuration();
        let current = config.active().ok_or(CameraError::NoActiveInput)?;
        config.remove_input(current)?;
        config.add_input(current.opposite())?;
        let now = config.commit()?;
        log::info!("switched camera input {:?} -> {:?}", current, now);
        Ok(now)
    }

    /// Pull one frame from the active input, waiting at most `timeout`, and
    /// hand it to `deliver` while still holding the session lock.
    pub fn deliver_next<F>(&self, timeout: Duration, deliver: F) -> Result<()>
    where
        F: FnOnce(Frame),
    {
        let mut inner = self.inner.lock();
        let position = inner.active.ok_or(CameraError::NoActiveInput)?;
        let frame = inner.source_mut(position)?.next_frame(timeout)?;
        deliver(frame);
        Ok(())
    }
}

/// Exclusive handle on the session's inputs for the duration of one change.
pub struct SessionConfiguration<'a> {
    guard: MutexGuard<'a, SessionInner>,
    original: Option<CameraPosition>,
    committed: bool,
}

impl SessionConfiguration<'_> {
    pub fn active(&self) -> Option<CameraPosition> {
        self.guard.active
    }

    pub fn remove_input(&mut self, position: CameraPosition) -> Result<()> {
        if self.guard.active != Some(position) {
            return Err(CameraError::Configuration(format!("{position:?} input is not attached")));
        }
        self.guard.source_mut(position)?.stop()?;
        self.guard.active = None;
        Ok(())
    }

    pub fn add_input(&mut self, position: CameraPosition) -> Result<()> {
        if let Some(active) = self.guard.active {
            return Err(CameraError::Configuration(format!(
                "cannot attach {position:?} while {active:?} is attached"
            )));
        }
        self.guard
            .source_mut(position)?
            .start()
            .map_err(|e| CameraError::Configuration(format!("{position:?} input failed to start: {e}")))?;
        self.guard.active = Some(position);
        Ok(())
    }

    /// Finish the change. A configuration without an active input is rejected.
    pub fn commit(mut self) -> Result<CameraPosition> {
        match self.guard.active {
            Some(position) => {
                self.committed = true;
                Ok(position)
            }
            None => Err(CameraError::Configuration("no input attached at commit".into())),
        }
    }

    fn rollback(&mut self) {
        if self.guard.active == self.original {
            return;
        }
        if let Some(current) = self.guard.active.take() {
            if let Ok(source) = self.guard.source_mut(current) {
                if let Err(e) = source.stop() {
                    log::warn!("rollback: failed to stop {current:?}: {e}");
                }
            }
        }
        if let Some(original) = self.original {
            match self.guard.source_mut(original).and_then(|s| s.start()) {
                Ok(()) => self.guard.active = Some(original),
                Err(e) => log::error!("rollback: failed to restart {original:?}: {e}"),
            }
        }
    }
}

impl Drop for SessionConfiguration<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}
