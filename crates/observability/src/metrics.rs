//! Transfer metrics.
//!
//! Workers report job and page outcomes through [`MetricRecorder`]. The
//! default [`LoggingMetricRecorder`] turns each one into a `tracing` event;
//! exporters for a real backend implement the same trait and are combined
//! with [`MultiplexMetricRecorder`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

/// Which transfer a metric belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TransferLabels {
    pub data_type: String,
    pub export_service: String,
    pub import_service: String,
}

impl TransferLabels {
    pub fn new(
        data_type: impl Into<String>,
        export_service: impl Into<String>,
        import_service: impl Into<String>,
    ) -> Self {
        Self {
            data_type: data_type.into(),
            export_service: export_service.into(),
            import_service: import_service.into(),
        }
    }
}

/// Sink for transfer metrics.
pub trait MetricRecorder: Send + Sync {
    fn job_started(&self, labels: &TransferLabels);

    /// One export call (retries included) finished.
    fn export_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration);

    /// Every item of one exported page went through the importer.
    /// `success` is false when any of them failed.
    fn import_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration);

    fn job_finished(&self, labels: &TransferLabels, success: bool, duration: Duration);
}

/// Logs every metric at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMetricRecorder;

impl MetricRecorder for LoggingMetricRecorder {
    fn job_started(&self, labels: &TransferLabels) {
        debug!(
            data_type = %labels.data_type,
            export_service = %labels.export_service,
            import_service = %labels.import_service,
            "Metric: job started"
        );
    }

    fn export_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        debug!(
            data_type = %labels.data_type,
            service = %labels.export_service,
            success,
            duration_ms = duration.as_millis() as u64,
            "Metric: export page finished"
        );
    }

    fn import_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        debug!(
            data_type = %labels.data_type,
            service = %labels.import_service,
            success,
            duration_ms = duration.as_millis() as u64,
            "Metric: import page finished"
        );
    }

    fn job_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        debug!(
            data_type = %labels.data_type,
            export_service = %labels.export_service,
            import_service = %labels.import_service,
            success,
            duration_ms = duration.as_millis() as u64,
            "Metric: job finished"
        );
    }
}

/// Fans every metric out to several recorders, in order.
#[derive(Clone, Default)]
pub struct MultiplexMetricRecorder {
    recorders: Vec<Arc<dyn MetricRecorder>>,
}

impl MultiplexMetricRecorder {
    pub fn new(recorders: Vec<Arc<dyn MetricRecorder>>) -> Self {
        Self { recorders }
    }

    pub fn with(mut self, recorder: Arc<dyn MetricRecorder>) -> Self {
        self.recorders.push(recorder);
        self
    }
}

impl std::fmt::Debug for MultiplexMetricRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexMetricRecorder")
            .field("recorders", &self.recorders.len())
            .finish()
    }
}

impl MetricRecorder for MultiplexMetricRecorder {
    fn job_started(&self, labels: &TransferLabels) {
        self.recorders.iter().for_each(|r| r.job_started(labels));
    }

    fn export_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        for r in &self.recorders {
            r.export_page_finished(labels, success, duration);
        }
    }

    fn import_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        for r in &self.recorders {
            r.import_page_finished(labels, success, duration);
        }
    }

    fn job_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        for r in &self.recorders {
            r.job_finished(labels, success, duration);
        }
    }
}

/// A recorded metric, without its duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    JobStarted(TransferLabels),
    ExportPage { labels: TransferLabels, success: bool },
    ImportPage { labels: TransferLabels, success: bool },
    JobFinished { labels: TransferLabels, success: bool },
}

/// Keeps every metric in memory; handy for tests and local debugging.
#[derive(Debug, Default)]
pub struct InMemoryMetricRecorder {
    events: Mutex<Vec<(MetricEvent, Duration)>>,
}

impl InMemoryMetricRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.lock().iter().map(|(event, _)| event.clone()).collect()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.lock().iter().map(|(_, d)| *d).collect()
    }

    fn push(&self, event: MetricEvent, duration: Duration) {
        self.lock().push((event, duration));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(MetricEvent, Duration)>> {
        // A poisoned log is still a valid log.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MetricRecorder for InMemoryMetricRecorder {
    fn job_started(&self, labels: &TransferLabels) {
        self.push(MetricEvent::JobStarted(labels.clone()), Duration::ZERO);
    }

    fn export_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        let labels = labels.clone();
        self.push(MetricEvent::ExportPage { labels, success }, duration);
    }

    fn import_page_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        let labels = labels.clone();
        self.push(MetricEvent::ImportPage { labels, success }, duration);
    }

    fn job_finished(&self, labels: &TransferLabels, success: bool, duration: Duration) {
        let labels = labels.clone();
        self.push(MetricEvent::JobFinished { labels, success }, duration);
    }
}
