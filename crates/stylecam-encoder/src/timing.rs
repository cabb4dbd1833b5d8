//! Presentation time on a fixed integer timescale.
//!
//! Every supported frame rate divides [`TIMESCALE`], so frame `i` lands at
//! exactly `i * (TIMESCALE / fps)` ticks with no accumulated rounding.

use std::fmt;
use std::time::Duration;

use crate::{EncoderError, Result};

/// Ticks per second.
pub const TIMESCALE: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime { value: 0, timescale: TIMESCALE };

    pub fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    /// `self * count`, keeping the timescale.
    pub fn multiply(self, count: u64) -> Self {
        Self { value: self.value * count as i64, timescale: self.timescale }
    }

    pub fn as_secs_f64(self) -> f64 {
        self.value as f64 / f64::from(self.timescale)
    }

    /// Exact nanoseconds for non-negative times.
    pub fn as_nanos(self) -> u64 {
        let nanos = self.value.max(0) as u128 * 1_000_000_000 / u128::from(self.timescale.max(1));
        nanos as u64
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.as_nanos())
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

/// Duration of one frame at `fps`. Rates that do not divide the timescale are
/// rejected rather than rounded.
pub fn frame_duration(fps: u32) -> Result<MediaTime> {
    if fps == 0 || TIMESCALE % fps != 0 {
        return Err(EncoderError::InvalidFrameRate(fps));
    }
    Ok(MediaTime::new(i64::from(TIMESCALE / fps), TIMESCALE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_rates_divide_timescale() {
        for fps in [1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 24, 25, 30, 60] {
            let d = frame_duration(fps).unwrap();
            assert_eq!(d.value * i64::from(fps), i64::from(TIMESCALE));
        }
    }

    #[test]
    fn rejects_zero_and_non_divisors() {
        assert!(matches!(frame_duration(0), Err(EncoderError::InvalidFrameRate(0))));
        assert!(matches!(frame_duration(29), Err(EncoderError::InvalidFrameRate(29))));
        assert!(matches!(frame_duration(7), Err(EncoderError::InvalidFrameRate(7))));
    }

    #[test]
    fn thirty_fps_timestamps_do_not_drift() {
        let d = frame_duration(30).unwrap();
        for i in 0..10_000u64 {
            let pts = d.multiply(i);
            // pts == i / 30 seconds, exactly
            assert_eq!(pts.value * 30, i as i64 * i64::from(TIMESCALE));
            assert_eq!(pts.as_nanos(), i * 1_000_000_000 / 30);
        }
        assert_eq!(d.multiply(90).as_secs_f64(), 3.0);
    }
}
