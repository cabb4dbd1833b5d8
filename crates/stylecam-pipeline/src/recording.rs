//! Frames collected while recording is on.
//!
//! The recording flag and the frame list share one lock: an append either
//! lands before a stop-and-drain and is returned by it, or sees the flag
//! already cleared and is refused.

use parking_lot::Mutex;
use stylecam_camera::Frame;

#[derive(Default)]
struct Recording {
    active: bool,
    frames: Vec<Frame>,
}

#[derive(Default)]
pub struct RecordingBuffer {
    inner: Mutex<Recording>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a session. Returns `false` if one was already running.
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.active {
            return false;
        }
        if !inner.frames.is_empty() {
            log::warn!("discarding {} frames left from an undrained recording", inner.frames.len());
            inner.frames.clear();
        }
        inner.active = true;
        true
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().active
    }

    /// Append in arrival order. Refused (returns `false`) unless recording.
    pub fn append(&self, frame: Frame) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active {
            return false;
        }
        inner.frames.push(frame);
        true
    }

    /// End the session and take every frame it collected.
    pub fn stop_and_drain(&self) -> Vec<Frame> {
        let mut inner = self.inner.lock();
        inner.active = false;
        std::mem::take(&mut inner.frames)
    }

    /// Take the frames collected so far without changing the flag.
    pub fn drain_and_clear(&self) -> Vec<Frame> {
        std::mem::take(&mut self.inner.lock().frames)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use stylecam_camera::PixelBuffer;

    fn tagged(tag: u8) -> Frame {
        Frame::rgba(1, 1, PixelBuffer::from_vec(vec![tag, 0, 0, 255])).unwrap()
    }

    fn tags(frames: &[Frame]) -> Vec<u8> {
        frames.iter().map(|f| f.buffer[0]).collect()
    }

    #[test]
    fn append_is_refused_while_idle() {
        let buffer = RecordingBuffer::new();
        assert!(!buffer.append(tagged(1)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn drains_in_append_order_exactly_once() {
        let buffer = RecordingBuffer::new();
        assert!(buffer.start());
        assert!(!buffer.start());
        for tag in 0..50 {
            assert!(buffer.append(tagged(tag)));
        }
        let frames = buffer.stop_and_drain();
        assert_eq!(tags(&frames), (0..50).collect::<Vec<_>>());
        assert!(buffer.is_empty());
        assert!(!buffer.is_recording());
        assert!(buffer.stop_and_drain().is_empty());
    }

    #[test]
    fn drain_and_clear_keeps_recording() {
        let buffer = RecordingBuffer::new();
        buffer.start();
        buffer.append(tagged(1));
        assert_eq!(buffer.drain_and_clear().len(), 1);
        assert!(buffer.is_recording());
        assert!(buffer.append(tagged(2)));
        assert_eq!(tags(&buffer.stop_and_drain()), vec![2]);
    }

    #[test]
    fn concurrent_producer_loses_and_duplicates_nothing() {
        let buffer = Arc::new(RecordingBuffer::new());
        buffer.start();

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut accepted = Vec::new();
                for tag in 0..=255u8 {
                    if buffer.append(tagged(tag)) {
                        accepted.push(tag);
                    }
                    if tag % 16 == 0 {
                        thread::sleep(Duration::from_micros(200));
                    }
                }
                accepted
            })
        };

        thread::sleep(Duration::from_millis(2));
        let mut drained = tags(&buffer.drain_and_clear());
        thread::sleep(Duration::from_millis(2));
        drained.extend(tags(&buffer.stop_and_drain()));

        let accepted = producer.join().unwrap();
        assert_eq!(drained, accepted);
    }
}
