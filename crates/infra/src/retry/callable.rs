//! Retry loop around a unit of work.

use std::fmt::Display;
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use portage_core::{AdapterError, FailureKind};

use super::library::RetryStrategyLibrary;

/// Errors that carry their own retry classification.
pub trait Classified {
    fn failure_kind(&self) -> FailureKind;
}

impl Classified for AdapterError {
    fn failure_kind(&self) -> FailureKind {
        self.kind
    }
}

/// Why the retry loop gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    /// The active strategy refused another attempt.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
    /// The work was cancelled. `last` is the error before the cancellation
    /// when there was one, else the cancellation itself.
    #[error("cancelled after {attempts} attempt(s): {last}")]
    Cancelled { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Cancelled { last, .. } => last,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Runs work until it succeeds or the strategy for its failure kind stops.
///
/// Delays are measured from the start of the first attempt, so a strategy
/// bounds wall-clock time: if the work itself took longer than the next delay,
/// the retry happens immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryingCallable<'l> {
    library: &'l RetryStrategyLibrary,
    label: &'l str,
}

impl<'l> RetryingCallable<'l> {
    pub fn new(library: &'l RetryStrategyLibrary) -> Self {
        Self {
            library,
            label: "work",
        }
    }

    /// Name used in log lines.
    pub fn labelled(mut self, label: &'l str) -> Self {
        self.label = label;
        self
    }

    pub fn call<T, E, F>(&self, mut work: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Classified + Display,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut previous: Option<E> = None;

        loop {
            attempts = attempts.saturating_add(1);
            let err = match work() {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(label = self.label, attempts, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = err.failure_kind();
            if kind == FailureKind::Cancelled {
                debug!(label = self.label, attempts, "work cancelled");
                return Err(RetryError::Cancelled {
                    attempts,
                    last: previous.unwrap_or(err),
                });
            }

            let Some(delay) = self.library.strategy_for(kind).next_delay(attempts) else {
                warn!(label = self.label, attempts, error = %err, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts,
                    last: err,
                });
            };

            let elapsed = started.elapsed();
            match delay.checked_sub(elapsed) {
                Some(remaining) => {
                    debug!(
                        label = self.label,
                        attempts,
                        kind = ?kind,
                        wait_ms = remaining.as_millis() as u64,
                        error = %err,
                        "retrying"
                    );
                    thread::sleep(remaining);
                }
                None => {
                    debug!(label = self.label, attempts, kind = ?kind, error = %err, "retrying now");
                }
            }
            previous = Some(err);
        }
    }
}
