//! CPU-side frame timing.

use std::time::{Duration, Instant};

/// Measures CPU time spent between a frame's begin and end.
///
/// `begin` marks the start of a frame, `end` returns the time since that mark
/// and folds it into a running average used for frame statistics.
#[derive(Debug)]
pub struct Timer {
    created: Instant,
    frame_start: Option<Instant>,
    frames: u64,
    total: Duration,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            frame_start: None,
            frames: 0,
            total: Duration::ZERO,
        }
    }

    /// Total time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// Marks the start of a frame.
    pub fn begin(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    /// Ends the current frame and returns its duration.
    ///
    /// Returns [`Duration::ZERO`] when `begin` was not called.
    pub fn end(&mut self) -> Duration {
        let Some(start) = self.frame_start.take() else {
            return Duration::ZERO;
        };
        let frame = start.elapsed();
        self.frames += 1;
        self.total += frame;
        frame
    }

    /// Number of frames measured so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Mean frame duration over every measured frame.
    pub fn average(&self) -> Duration {
        if self.frames == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total.as_secs_f64() / self.frames as f64)
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_without_begin_is_zero() {
        let mut timer = Timer::new();
        assert_eq!(timer.end(), Duration::ZERO);
        assert_eq!(timer.frames(), 0);
    }

    #[test]
    fn test_frames_are_counted() {
        let mut timer = Timer::new();
        for _ in 0..3 {
            timer.begin();
            timer.end();
        }
        assert_eq!(timer.frames(), 3);
        assert!(timer.average() <= timer.elapsed());
    }
}
