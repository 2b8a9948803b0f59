//! Simulation frame descriptor.

use serde::{Deserialize, Serialize};

/// One discrete step of a simulation: an integer frame index plus the
/// fixed wall-clock interval the frame spans.
///
/// Frames only report progress; solver correctness never depends on them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame index, advanced by exactly one per step.
    pub index: i32,
    /// Time interval between frames in seconds.
    pub time_interval_in_seconds: f64,
}

impl Frame {
    /// Create a frame at `index` with the given interval.
    pub fn new(index: i32, time_interval_in_seconds: f64) -> Self {
        assert!(
            time_interval_in_seconds > 0.0,
            "frame interval must be positive, got {}",
            time_interval_in_seconds
        );
        Self {
            index,
            time_interval_in_seconds,
        }
    }

    /// Elapsed simulation time at the start of this frame.
    #[inline]
    pub fn time_in_seconds(&self) -> f64 {
        f64::from(self.index) * self.time_interval_in_seconds
    }

    /// Advance by one frame.
    #[inline]
    pub fn advance(&mut self) {
        self.index += 1;
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            index: 0,
            time_interval_in_seconds: 1.0 / 60.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_steps_one_frame() {
        let mut frame = Frame::new(0, 0.02);
        frame.advance();
        frame.advance();
        assert_eq!(frame.index, 2);
        assert!((frame.time_in_seconds() - 0.04).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "frame interval must be positive, got 0")]
    fn zero_interval_is_rejected() {
        let _ = Frame::new(0, 0.0);
    }
}
