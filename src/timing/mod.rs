//! Frame pacing for the analysis stream
//!
//! Tracks the last emission instant and computes how long a hardware buffer
//! must still be held so that consecutive emissions respect the configured
//! maximum frames per second.

use std::time::{Duration, Instant};

/// Max-frames-per-second limiter coupled to the analysis backpressure gate
#[derive(Debug, Clone)]
pub struct FrameRateLimiter {
    min_interval: Option<Duration>,
    last_emit: Option<Instant>,
}

impl FrameRateLimiter {
    /// Create a limiter; `None`, zero, negative or non-finite rates disable pacing
    pub fn new(max_frames_per_second: Option<f64>) -> Self {
        let min_interval = max_frames_per_second
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps));
        Self {
            min_interval,
            last_emit: None,
        }
    }

    /// Minimum spacing between two emissions
    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    pub fn is_limited(&self) -> bool {
        self.min_interval.is_some()
    }

    /// Record that a frame was handed to the consumer at `at`
    #[inline]
    pub fn record_emit(&mut self, at: Instant) {
        self.last_emit = Some(at);
    }

    pub fn last_emit(&self) -> Option<Instant> {
        self.last_emit
    }

    /// Remaining hold time at `now`: `max(0, interval - (now - last_emit))`
    ///
    /// Before the first emission the full interval applies.
    pub fn release_delay(&self, now: Instant) -> Duration {
        match (self.min_interval, self.last_emit) {
            (None, _) => Duration::ZERO,
            (Some(interval), None) => interval,
            (Some(interval), Some(last)) => {
                interval.saturating_sub(now.saturating_duration_since(last))
            }
        }
    }

    /// Forget the last emission, e.g. after the pipeline is rebound
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

impl Default for FrameRateLimiter {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_has_no_delay() {
        let mut limiter = FrameRateLimiter::new(None);
        limiter.record_emit(Instant::now());
        assert_eq!(limiter.release_delay(Instant::now()), Duration::ZERO);
        assert!(!FrameRateLimiter::new(Some(0.0)).is_limited());
        assert!(!FrameRateLimiter::new(Some(f64::NAN)).is_limited());
    }

    #[test]
    fn test_first_frame_waits_full_interval() {
        let limiter = FrameRateLimiter::new(Some(10.0));
        assert_eq!(limiter.release_delay(Instant::now()), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_shrinks_with_elapsed_time() {
        let mut limiter = FrameRateLimiter::new(Some(4.0));
        let start = Instant::now();
        limiter.record_emit(start);
        let delay = limiter.release_delay(start + Duration::from_millis(100));
        assert_eq!(delay, Duration::from_millis(150));
        let delay = limiter.release_delay(start + Duration::from_millis(400));
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_reset_forgets_last_emit() {
        let mut limiter = FrameRateLimiter::new(Some(20.0));
        limiter.record_emit(Instant::now());
        limiter.reset();
        assert!(limiter.last_emit().is_none());
    }
}
