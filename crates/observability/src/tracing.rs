//! Tracing/logging initialization and per-job spans.

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// JSON lines with timestamps, filtered by `RUST_LOG` (default `info`).
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Span covering one job from claim to removal.
///
/// Entered by the worker so every event logged while the job is processed
/// carries its id and data type.
pub fn job_span(job_id: impl std::fmt::Display, data_type: &str) -> Span {
    tracing::info_span!("job", job_id = %job_id, data_type = %data_type)
}
