use std::time::{Duration, Instant};

/// Minimum-interval gate for the encoder draw step.
///
/// A draw is allowed only when at least `1 / fps` has elapsed since the last
/// allowed draw. Skipped ticks are dropped, not deferred. `fps == 0` disables
/// the limit.
#[derive(Debug, Clone)]
pub struct FpsLimiter {
    interval: Duration,
    last_draw: Option<Instant>,
}

impl FpsLimiter {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Self::interval_for(fps),
            last_draw: None,
        }
    }

    /// Change the budget. The next tick is always allowed.
    pub fn set_fps(&mut self, fps: u32) {
        self.interval = Self::interval_for(fps);
        self.last_draw = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` if the draw at `now` must be skipped. An allowed draw
    /// is recorded as the new reference point.
    pub fn should_skip(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() {
            self.last_draw = Some(now);
            return false;
        }
        match self.last_draw {
            Some(last) if now.saturating_duration_since(last) < self.interval => true,
            _ => {
                self.last_draw = Some(now);
                false
            }
        }
    }

    fn interval_for(fps: u32) -> Duration {
        if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / fps as f64)
        }
    }
}

impl Default for FpsLimiter {
    fn default() -> Self {
        Self::new(30)
    }
}
