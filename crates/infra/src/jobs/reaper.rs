//! Recovery for claims whose worker went away.
//!
//! A job stuck waiting for credentials longer than the claim TTL is moved to
//! `TIMED_OUT`; on the next pass `TIMED_OUT` records are deleted. The gap
//! between the two gives a live owner one poll to notice and stop waiting.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use portage_core::{JobId, JobState};

use super::store::{JobStore, JobStoreError, UpdatePrecondition};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub timed_out: Vec<JobId>,
    pub removed: Vec<JobId>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct StaleClaimReaper<S> {
    store: S,
    ttl: Duration,
    batch: usize,
}

impl<S: JobStore> StaleClaimReaper<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            batch: 100,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    pub fn reap(&self, now: DateTime<Utc>) -> Result<ReapReport, JobStoreError> {
        let mut report = ReapReport::default();

        for job in self.store.find_by_state(JobState::TimedOut, self.batch)? {
            match self.store.remove_job(job.id) {
                Ok(()) => report.removed.push(job.id),
                Err(JobStoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        for state in [JobState::CredsEncryptionKeyGenerated, JobState::CredsStored] {
            for mut job in self.store.find_by_state(state, self.batch)? {
                let since = job.authorization.claimed_at.unwrap_or(job.created_at);
                let stale = now
                    .signed_duration_since(since)
                    .to_std()
                    .is_ok_and(|age| age >= self.ttl);
                if !stale || job.transition(JobState::TimedOut).is_err() {
                    continue;
                }
                match self
                    .store
                    .update_job(job.id, &job, Some(UpdatePrecondition::state_is(state)))
                {
                    Ok(()) => report.timed_out.push(job.id),
                    Err(JobStoreError::ClaimConflict(_) | JobStoreError::NotFound(_)) => {
                        debug!(job_id = %job.id, "job moved on before it could be timed out");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !report.is_empty() {
            info!(
                timed_out = report.timed_out.len(),
                removed = report.removed.len(),
                "reaped stale claims"
            );
        }
        Ok(report)
    }
}
