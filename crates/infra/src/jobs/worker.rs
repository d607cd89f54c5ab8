//! The transfer worker: claim one job, unwrap its credentials, copy, clean up.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use portage_core::{Job, JobId};
use portage_observability::{LoggingMetricRecorder, MetricRecorder, TransferLabels, job_span};
use portage_security::{CredentialError, CredentialUnwrapper, WorkerKeyPair};

use super::claim::{ClaimedJob, JobPoller, PollOutcome};
use super::reaper::StaleClaimReaper;
use super::store::{JobStore, JobStoreError};
use crate::config::{ConfigError, WorkerConfig};
use crate::copier::{CopyReport, DataCopier};
use crate::hooks::{JobHooks, JobSignal, SignalStatus, notify};
use crate::registry::AdapterRegistry;
use crate::retry::RetryStrategyLibrary;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error("worker thread panicked")]
    Panicked,
}

/// Everything one job run needs, passed explicitly instead of held globally.
#[derive(Debug)]
pub struct JobContext {
    pub job_id: JobId,
    pub data_type: String,
    pub export_service: String,
    pub import_service: String,
    pub started_at: DateTime<Utc>,
    key_pair: WorkerKeyPair,
}

impl JobContext {
    pub fn new(job: &Job, claimed: ClaimedJob) -> Self {
        Self {
            job_id: job.id,
            data_type: job.data_type.clone(),
            export_service: job.export_service.clone(),
            import_service: job.import_service.clone(),
            started_at: Utc::now(),
            key_pair: claimed.key_pair,
        }
    }

    pub fn labels(&self) -> TransferLabels {
        TransferLabels::new(&self.data_type, &self.export_service, &self.import_service)
    }

    fn signal(&self, status: SignalStatus) -> JobSignal {
        JobSignal {
            job_id: self.job_id,
            data_type: self.data_type.clone(),
            export_service: self.export_service.clone(),
            import_service: self.import_service.clone(),
            status,
        }
    }
}

/// How a job run ended. The job record is removed in every case.
#[derive(Debug)]
pub enum JobOutcome {
    /// The copy ran to the end; the report lists item and branch failures.
    Completed(CopyReport),
    /// The owned job was unusable before copying started.
    Abandoned { job_id: JobId, reason: String },
    CredentialFailure { job_id: JobId, error: CredentialError },
    /// No exporter or importer is registered for the job.
    Unsupported {
        job_id: JobId,
        export_service: String,
        import_service: String,
        data_type: String,
    },
    TimedOut(JobId),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub polls: u64,
    pub claims_won: u64,
    pub claims_lost: u64,
    pub stale_claims_timed_out: u64,
    pub store_errors: u64,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<Result<Option<JobOutcome>, WorkerError>>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Ask the worker to stop at its next poll and wait for it.
    ///
    /// A job that is already being copied runs to completion first.
    pub fn shutdown(self) -> Result<Option<JobOutcome>, WorkerError> {
        let _ = self.shutdown.send(());
        self.join()
    }

    /// Wait for the worker to finish its job. `None` if it was shut down
    /// before one was processed.
    pub fn join(mut self) -> Result<Option<JobOutcome>, WorkerError> {
        match self.join.take() {
            Some(handle) => handle.join().map_err(|_| WorkerError::Panicked)?,
            None => Ok(None),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Single-job transfer worker.
pub struct Worker<S> {
    store: S,
    registry: Arc<AdapterRegistry>,
    hooks: Arc<dyn JobHooks>,
    retry: Arc<RetryStrategyLibrary>,
    metrics: Arc<dyn MetricRecorder>,
    config: WorkerConfig,
}

impl<S: JobStore + Clone + 'static> Worker<S> {
    pub fn new(
        store: S,
        registry: Arc<AdapterRegistry>,
        hooks: Arc<dyn JobHooks>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            hooks,
            retry: Arc::new(RetryStrategyLibrary::default()),
            metrics: Arc::new(LoggingMetricRecorder),
            config,
        }
    }

    pub fn with_retry_library(mut self, retry: RetryStrategyLibrary) -> Self {
        self.retry = Arc::new(retry);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run on a named background thread.
    pub fn spawn(self) -> Result<WorkerHandle, WorkerError> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let thread_stats = stats.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || self.run(&shutdown_rx, &thread_stats))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Poll until one job has been handled or shutdown is requested.
    pub fn run(
        &self,
        shutdown: &mpsc::Receiver<()>,
        stats: &Mutex<WorkerStats>,
    ) -> Result<Option<JobOutcome>, WorkerError> {
        info!(worker = %self.config.name, "worker started");
        let mut poller = JobPoller::new(
            self.store.clone(),
            self.config.rsa_key_bits,
            self.config.claim_ttl,
        );
        let reaper = self
            .config
            .claim_ttl
            .map(|ttl| StaleClaimReaper::new(self.store.clone(), ttl));
        let bump = |f: fn(&mut WorkerStats)| f(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));

        loop {
            bump(|s| s.polls += 1);

            if poller.is_searching() {
                if let Some(reaper) = &reaper {
                    match reaper.reap(Utc::now()) {
                        Ok(report) => {
                            let n = report.timed_out.len() as u64;
                            stats
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .stale_claims_timed_out += n;
                        }
                        Err(e) => warn!(worker = %self.config.name, error = %e, "reaper pass failed"),
                    }
                }
            }

            match poller.poll_once() {
                Ok(PollOutcome::Ready(claimed, job)) => {
                    let outcome = self.process(claimed, job);
                    info!(worker = %self.config.name, "worker finished its job");
                    return Ok(Some(outcome));
                }
                Ok(PollOutcome::Abandoned { job_id, reason }) => {
                    self.remove(job_id);
                    return Ok(Some(JobOutcome::Abandoned { job_id, reason }));
                }
                Ok(PollOutcome::TimedOut(job_id)) => {
                    self.remove(job_id);
                    return Ok(Some(JobOutcome::TimedOut(job_id)));
                }
                Ok(PollOutcome::Claimed(_)) => bump(|s| s.claims_won += 1),
                Ok(PollOutcome::Conflict(_)) => bump(|s| s.claims_lost += 1),
                Ok(PollOutcome::Idle | PollOutcome::Waiting(_)) => {}
                Err(WorkerError::Store(e)) => {
                    bump(|s| s.store_errors += 1);
                    error!(worker = %self.config.name, error = %e, "job store unavailable");
                }
                Err(e) => return Err(e),
            }

            match shutdown.recv_timeout(self.config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!(worker = %self.config.name, "worker stopped");
                    return Ok(None);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Process a job whose credentials have arrived, then remove it.
    pub fn process(&self, claimed: ClaimedJob, job: Job) -> JobOutcome {
        let span = job_span(job.id, &job.data_type);
        let _entered = span.enter();

        let ctx = JobContext::new(&job, claimed);
        let outcome = self.run_job(&ctx, &job);
        self.remove(ctx.job_id);
        outcome
    }

    fn run_job(&self, ctx: &JobContext, job: &Job) -> JobOutcome {
        let exporter = self.registry.exporter(&ctx.export_service, &ctx.data_type);
        let importer = self.registry.importer(&ctx.import_service, &ctx.data_type);
        let (Some(exporter), Some(importer)) = (exporter, importer) else {
            warn!(
                export_service = %ctx.export_service,
                import_service = %ctx.import_service,
                "no adapters registered for this transfer"
            );
            notify(self.hooks.as_ref(), &ctx.signal(SignalStatus::Failed));
            return JobOutcome::Unsupported {
                job_id: ctx.job_id,
                export_service: ctx.export_service.clone(),
                import_service: ctx.import_service.clone(),
                data_type: ctx.data_type.clone(),
            };
        };

        let credentials = match CredentialUnwrapper::new(&ctx.key_pair).unwrap(&job.authorization) {
            Ok(credentials) => credentials,
            Err(error) => {
                error!(error = %error, "could not decrypt credentials; abandoning job");
                notify(self.hooks.as_ref(), &ctx.signal(SignalStatus::Failed));
                return JobOutcome::CredentialFailure {
                    job_id: ctx.job_id,
                    error,
                };
            }
        };

        notify(self.hooks.as_ref(), &ctx.signal(SignalStatus::Started));
        let labels = ctx.labels();
        self.metrics.job_started(&labels);
        let copy_started = Instant::now();
        let report = DataCopier::new(exporter, importer, self.retry.clone())
            .with_traversal(self.config.traversal)
            .with_metrics(self.metrics.clone(), labels.clone())
            .copy(ctx.job_id, &credentials.export, &credentials.import);
        self.metrics
            .job_finished(&labels, report.is_clean(), copy_started.elapsed());

        let status = if report.is_clean() {
            SignalStatus::Succeeded
        } else {
            SignalStatus::CompletedWithErrors
        };
        let elapsed_ms = (Utc::now() - ctx.started_at).num_milliseconds();
        info!(status = ?status, elapsed_ms, errors = report.errors.len(), "job complete");
        notify(self.hooks.as_ref(), &ctx.signal(status));
        JobOutcome::Completed(report)
    }

    fn remove(&self, job_id: JobId) {
        match self.store.remove_job(job_id) {
            Ok(()) => debug!(job_id = %job_id, "job removed"),
            Err(JobStoreError::NotFound(_)) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to remove job"),
        }
    }
}

impl<S> core::fmt::Debug for Worker<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
