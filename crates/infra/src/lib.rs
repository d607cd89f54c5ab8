//! Transfer engine: job claiming, retries, idempotent imports and the copier.

pub mod config;
pub mod copier;
pub mod hooks;
pub mod idempotent;
pub mod jobs;
pub mod registry;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, WorkerConfig};
pub use copier::{CopyError, CopyReport, DataCopier, Traversal};
pub use hooks::{JobHooks, JobSignal, LoggingJobHooks, NoopJobHooks, SignalStatus};
pub use idempotent::{ErrorDetail, IdempotentError, IdempotentImportExecutor};
pub use registry::AdapterRegistry;
pub use retry::{RetryError, RetryStrategy, RetryStrategyLibrary, RetryingCallable};
