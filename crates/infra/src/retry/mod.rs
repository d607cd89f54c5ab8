//! Retry with backoff for adapter calls.
//!
//! - `RetryStrategy`: when to try again (fixed interval, exponential, never)
//! - `RetryStrategyLibrary`: picks a strategy from the failure's `FailureKind`
//! - `RetryingCallable`: the loop itself

pub mod callable;
pub mod library;
pub mod strategy;

pub use callable::{Classified, RetryError, RetryingCallable};
pub use library::{RetryRule, RetryStrategyLibrary};
pub use strategy::RetryStrategy;
