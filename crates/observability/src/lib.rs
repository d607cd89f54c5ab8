//! Tracing, logging and metrics shared by every worker process.

/// Transfer metrics (job and page outcomes).
pub mod metrics;
/// Subscriber installation (filters, JSON formatting).
pub mod tracing;

pub use crate::metrics::{
    InMemoryMetricRecorder, LoggingMetricRecorder, MetricEvent, MetricRecorder,
    MultiplexMetricRecorder, TransferLabels,
};
pub use crate::tracing::{init, job_span};
