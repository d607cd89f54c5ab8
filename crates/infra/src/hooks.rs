//! Best-effort job lifecycle notifications.
//!
//! Hooks report to the services on each side of a transfer. A failing hook is
//! logged and otherwise ignored; it never changes a job's outcome.

use serde::Serialize;
use tracing::{info, warn};

use portage_core::JobId;

/// Final status reported when a job ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Started,
    Succeeded,
    /// Finished, but some items or branches failed.
    CompletedWithErrors,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSignal {
    pub job_id: JobId,
    pub data_type: String,
    pub export_service: String,
    pub import_service: String,
    pub status: SignalStatus,
}

pub trait JobHooks: Send + Sync {
    fn job_started(&self, signal: &JobSignal) -> anyhow::Result<()>;

    fn job_finished(&self, signal: &JobSignal) -> anyhow::Result<()>;
}

/// Default hooks: one structured log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingJobHooks;

impl JobHooks for LoggingJobHooks {
    fn job_started(&self, signal: &JobSignal) -> anyhow::Result<()> {
        info!(
            job_id = %signal.job_id,
            data_type = %signal.data_type,
            export_service = %signal.export_service,
            import_service = %signal.import_service,
            "job started"
        );
        Ok(())
    }

    fn job_finished(&self, signal: &JobSignal) -> anyhow::Result<()> {
        info!(
            job_id = %signal.job_id,
            data_type = %signal.data_type,
            status = ?signal.status,
            "job finished"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJobHooks;

impl JobHooks for NoopJobHooks {
    fn job_started(&self, _signal: &JobSignal) -> anyhow::Result<()> {
        Ok(())
    }

    fn job_finished(&self, _signal: &JobSignal) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Deliver `signal`, swallowing failures.
pub(crate) fn notify(hooks: &dyn JobHooks, signal: &JobSignal) {
    let delivered = match signal.status {
        SignalStatus::Started => hooks.job_started(signal),
        _ => hooks.job_finished(signal),
    };
    if let Err(e) = delivered {
        warn!(job_id = %signal.job_id, status = ?signal.status, error = %e, "job hook failed");
    }
}
