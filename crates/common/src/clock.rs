//! Timing utilities for progress reporting and scratch naming.
//!
//! Chat transports rate-limit message edits, so encoder progress is
//! funnelled through a [`ProgressThrottle`] before it reaches the user.
//! Reported values are monotonic and bounded to `[0.0, 1.0]`.

use std::time::Duration;

/// Rate limiter for progress notifications.
///
/// Time is passed in explicitly as elapsed duration since the job
/// started, which keeps the throttle deterministic under test.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Duration>,
    last_value: f64,
}

impl ProgressThrottle {
    /// Create a throttle that emits at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_value: 0.0,
        }
    }

    /// Offer a new progress sample.
    ///
    /// Returns the value to publish, or `None` if the sample is too soon
    /// or does not advance past the last published value. The first
    /// advancing sample always fires.
    pub fn offer(&mut self, elapsed: Duration, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let value = value.clamp(0.0, 1.0);
        if value <= self.last_value {
            return None;
        }
        match self.last_emit {
            Some(last) if elapsed < last + self.interval => None,
            _ => {
                self.last_emit = Some(elapsed);
                self.last_value = value;
                Some(value)
            }
        }
    }

    /// Completion bypasses the interval; returns `Some(1.0)` once.
    pub fn finish(&mut self, elapsed: Duration) -> Option<f64> {
        if self.last_value >= 1.0 {
            return None;
        }
        self.last_emit = Some(elapsed);
        self.last_value = 1.0;
        Some(1.0)
    }

    /// Last published value.
    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Local wall-clock stamp used in scratch file names (`20240131235959`).
pub fn file_stamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}
