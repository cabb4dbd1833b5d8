//! Sink readiness flag with blocking wait.
//!
//! The sink side flips the flag from its own callbacks (`need-data` /
//! `enough-data` for appsrc); the encoder waits on the condvar instead of
//! polling.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
pub struct ReadySignal {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReadySignal {
    pub fn new(ready: bool) -> Self {
        Self { ready: Mutex::new(ready), cond: Condvar::new() }
    }

    pub fn set_ready(&self, ready: bool) {
        let mut guard = self.ready.lock();
        if *guard != ready {
            *guard = ready;
            if ready {
                self.cond.notify_all();
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    /// Block until ready or `timeout` elapses. Returns the final readiness.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.ready.lock();
        while !*guard {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return *guard;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_when_ready() {
        let signal = ReadySignal::default();
        assert!(signal.wait_ready(Duration::ZERO));
    }

    #[test]
    fn wait_times_out_when_never_ready() {
        let signal = ReadySignal::new(false);
        let start = Instant::now();
        assert!(!signal.wait_ready(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wakes_when_another_thread_signals() {
        let signal = Arc::new(ReadySignal::new(false));
        let setter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.set_ready(true);
            })
        };
        assert!(signal.wait_ready(Duration::from_secs(5)));
        setter.join().unwrap();
    }
}
