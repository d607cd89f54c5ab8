//! Backoff policies.

use std::time::Duration;

/// Ceiling for exponential delays unless a strategy sets its own.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(600);

/// How long to wait before the next attempt, measured from the start of the
/// first attempt.
///
/// `next_delay` returning `None` means stop retrying.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Fail on the first error.
    NoRetry,
    /// Constant delay while `attempt < max_attempts`.
    Simple {
        max_attempts: u32,
        interval: Duration,
    },
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`,
    /// while `attempt < max_attempts`.
    Exponential {
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    pub fn simple(max_attempts: u32, interval: Duration) -> Self {
        Self::Simple {
            max_attempts,
            interval,
        }
    }

    /// Exponential backoff capped at [`DEFAULT_MAX_DELAY`].
    ///
    /// A multiplier below 1 (or NaN) is treated as 1: delays never shrink.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self::Exponential {
            max_attempts,
            initial_delay: initial_delay.min(DEFAULT_MAX_DELAY),
            multiplier: sanitize_multiplier(multiplier),
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Replace the delay ceiling of an exponential strategy. Other strategies
    /// are returned unchanged.
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        if let RetryStrategy::Exponential { max_delay, .. } = &mut self {
            *max_delay = cap;
        }
        self
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` (1-indexed)
    /// just failed.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            RetryStrategy::NoRetry => None,
            RetryStrategy::Simple {
                max_attempts,
                interval,
            } => (attempt < max_attempts).then_some(interval),
            RetryStrategy::Exponential {
                max_attempts,
                initial_delay,
                multiplier,
                max_delay,
            } => {
                if attempt >= max_attempts {
                    return None;
                }
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial_delay.as_secs_f64() * sanitize_multiplier(multiplier).powi(exp);
                let delay = Duration::try_from_secs_f64(secs).unwrap_or(max_delay);
                Some(delay.min(max_delay))
            }
        }
    }

    /// Upper bound on how many times the work will run.
    pub fn max_attempts(&self) -> u32 {
        match *self {
            RetryStrategy::NoRetry => 1,
            RetryStrategy::Simple { max_attempts, .. }
            | RetryStrategy::Exponential { max_attempts, .. } => max_attempts.max(1),
        }
    }
}

// Fields are public, so `next_delay` re-checks what the constructor clamps.
fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    }
}
