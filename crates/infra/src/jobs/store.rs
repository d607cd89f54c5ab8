//! Job metadata storage.
//!
//! Workers coordinate only through [`JobStore::update_job`] with an
//! [`UpdatePrecondition`]; a backend must evaluate the precondition and the
//! write atomically.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use portage_core::{Job, JobId, JobState};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    fn create_job(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn find_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Replace a job record, optionally only if `precondition` holds for the
    /// currently stored record. A failed precondition is `ClaimConflict`.
    fn update_job(
        &self,
        job_id: JobId,
        job: &Job,
        precondition: Option<UpdatePrecondition>,
    ) -> Result<(), JobStoreError>;

    /// Delete a job record.
    fn remove_job(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Any job in `state`. No ordering guarantee.
    fn find_first_by_state(&self, state: JobState) -> Result<Option<JobId>, JobStoreError>;

    /// Up to `limit` jobs in `state`, oldest first.
    fn find_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, JobStoreError>;
}

/// Condition the stored record must satisfy for an update to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePrecondition {
    pub state: JobState,
    /// Also require that no worker public key has been published.
    pub unclaimed: bool,
}

impl UpdatePrecondition {
    pub fn state_is(state: JobState) -> Self {
        Self {
            state,
            unclaimed: false,
        }
    }

    pub fn and_unclaimed(mut self) -> Self {
        self.unclaimed = true;
        self
    }

    pub fn check(&self, stored: &Job) -> bool {
        stored.state() == self.state && (!self.unclaimed || !stored.authorization.is_claimed())
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    /// The conditional update lost a race; not a failure of the store.
    #[error("precondition failed for job {0}")]
    ClaimConflict(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    fn poisoned() -> Self {
        JobStoreError::Storage("job store lock poisoned".to_string())
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for InMemoryJobStore {
    fn create_job(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn find_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| JobStoreError::poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn update_job(
        &self,
        job_id: JobId,
        job: &Job,
        precondition: Option<UpdatePrecondition>,
    ) -> Result<(), JobStoreError> {
        // Check and write under one write lock.
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::poisoned())?;
        let stored = jobs.get(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if let Some(pre) = precondition {
            if !pre.check(stored) {
                return Err(JobStoreError::ClaimConflict(job_id));
            }
        }
        let mut next = job.clone();
        next.id = job_id;
        jobs.insert(job_id, next);
        Ok(())
    }

    fn remove_job(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::poisoned())?;
        jobs.remove(&job_id)
            .map(|_| ())
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn find_first_by_state(&self, state: JobState) -> Result<Option<JobId>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| JobStoreError::poisoned())?;
        Ok(jobs.values().find(|j| j.state() == state).map(|j| j.id))
    }

    fn find_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| JobStoreError::poisoned())?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.state() == state)
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn create_job(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).create_job(job)
    }

    fn find_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).find_job(job_id)
    }

    fn update_job(
        &self,
        job_id: JobId,
        job: &Job,
        precondition: Option<UpdatePrecondition>,
    ) -> Result<(), JobStoreError> {
        (**self).update_job(job_id, job, precondition)
    }

    fn remove_job(&self, job_id: JobId) -> Result<(), JobStoreError> {
        (**self).remove_job(job_id)
    }

    fn find_first_by_state(&self, state: JobState) -> Result<Option<JobId>, JobStoreError> {
        (**self).find_first_by_state(state)
    }

    fn find_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).find_by_state(state, limit)
    }
}
