use std::time::Duration;

use rusqlite::ErrorCode;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Backoff schedule for SQLite operations that hit a busy or locked database.
///
/// Delays grow as `multiplier * 2^(attempt - 1)` seconds, clamped to
/// `[min_delay, max_delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub multiplier: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            multiplier: 0.5,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Default schedule with a custom number of attempts (at least 1).
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.multiplier * 2f64.powi(exponent);
        let delay = if secs.is_finite() {
            Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
        } else {
            self.max_delay
        };
        delay.clamp(self.min_delay, self.max_delay)
    }
}

/// Sleep for `delay` without stalling the async runtime: on a multi-thread
/// runtime the worker hands its queue to another thread first.
pub(crate) fn pause(delay: Duration) {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| std::thread::sleep(delay));
        }
        _ => std::thread::sleep(delay),
    }
}

/// Returns `true` for errors that clear up once a competing writer finishes.
pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
