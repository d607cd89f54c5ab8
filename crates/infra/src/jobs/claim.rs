//! Finding, claiming and waiting on a job.
//!
//! A searching worker looks for any job in `CREDS_AVAILABLE` and claims it
//! with a conditional update that publishes a freshly generated public key.
//! Losing that race is normal and just means searching on. Once a claim
//! succeeds the worker owns that job and polls only it until the encrypted
//! credentials arrive.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use portage_core::{Job, JobId, JobState};
use portage_security::{WorkerKeyPair, fingerprint};

use super::store::{JobStore, JobStoreError, UpdatePrecondition};
use super::worker::WorkerError;

/// A job this worker owns, with the key pair only it holds.
#[derive(Debug)]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub key_pair: WorkerKeyPair,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(ClaimedJob),
    /// Another worker got there first, or the job moved on.
    Conflict,
}

/// What one poll produced.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing to claim.
    Idle,
    /// Won a claim; now waiting for credentials.
    Claimed(JobId),
    /// Lost a claim race; still searching.
    Conflict(JobId),
    /// Own a job whose credentials have not arrived yet.
    Waiting(JobId),
    /// Credentials are in place; the job can be processed.
    Ready(ClaimedJob, Job),
    /// The owned job is unusable and should be removed.
    Abandoned { job_id: JobId, reason: String },
    /// The claim went stale before credentials arrived.
    TimedOut(JobId),
}

#[derive(Debug)]
enum Mode {
    Searching,
    Owning(ClaimedJob),
}

/// The worker's claim state machine.
#[derive(Debug)]
pub struct JobPoller<S> {
    store: S,
    rsa_key_bits: usize,
    claim_ttl: Option<Duration>,
    mode: Mode,
}

impl<S: JobStore> JobPoller<S> {
    pub fn new(store: S, rsa_key_bits: usize, claim_ttl: Option<Duration>) -> Self {
        Self {
            store,
            rsa_key_bits,
            claim_ttl,
            mode: Mode::Searching,
        }
    }

    pub fn is_searching(&self) -> bool {
        matches!(self.mode, Mode::Searching)
    }

    pub fn owned_job(&self) -> Option<JobId> {
        match &self.mode {
            Mode::Owning(claimed) => Some(claimed.job_id),
            Mode::Searching => None,
        }
    }

    pub fn poll_once(&mut self) -> Result<PollOutcome, WorkerError> {
        if self.is_searching() {
            self.search()
        } else {
            self.check_owned()
        }
    }

    fn search(&mut self) -> Result<PollOutcome, WorkerError> {
        let Some(job_id) = self.store.find_first_by_state(JobState::CredsAvailable)? else {
            debug!("no job with credentials available");
            return Ok(PollOutcome::Idle);
        };

        let key_pair = WorkerKeyPair::generate_with_bits(self.rsa_key_bits)?;
        match self.claim_with(job_id, key_pair)? {
            ClaimOutcome::Claimed(claimed) => {
                self.mode = Mode::Owning(claimed);
                Ok(PollOutcome::Claimed(job_id))
            }
            ClaimOutcome::Conflict => Ok(PollOutcome::Conflict(job_id)),
        }
    }

    /// Conditionally claim `job_id` for `key_pair`: the stored job must still
    /// be `CREDS_AVAILABLE` with no worker key.
    pub fn claim_with(&self, job_id: JobId, key_pair: WorkerKeyPair) -> Result<ClaimOutcome, WorkerError> {
        let Some(mut job) = self.store.find_job(job_id)? else {
            return Ok(ClaimOutcome::Conflict);
        };
        if job.state() != JobState::CredsAvailable {
            return Ok(ClaimOutcome::Conflict);
        }

        let public_key = key_pair.public_key_der()?;
        let key_id = fingerprint(&public_key);
        let claimed_at = Utc::now();
        if job.claim(public_key, claimed_at).is_err() {
            return Ok(ClaimOutcome::Conflict);
        }

        let precondition = UpdatePrecondition::state_is(JobState::CredsAvailable).and_unclaimed();
        match self.store.update_job(job_id, &job, Some(precondition)) {
            Ok(()) => {
                info!(job_id = %job_id, key = %key_id, "claimed job");
                Ok(ClaimOutcome::Claimed(ClaimedJob {
                    job_id,
                    key_pair,
                    claimed_at,
                }))
            }
            Err(JobStoreError::ClaimConflict(_) | JobStoreError::NotFound(_)) => {
                debug!(job_id = %job_id, "lost claim race");
                Ok(ClaimOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_owned(&mut self) -> Result<PollOutcome, WorkerError> {
        let Mode::Owning(claimed) = &self.mode else {
            return Ok(PollOutcome::Idle);
        };
        let (job_id, claimed_at) = (claimed.job_id, claimed.claimed_at);
        let our_key = claimed.key_pair.public_key_der()?;

        let Some(job) = self.store.find_job(job_id)? else {
            warn!(job_id = %job_id, "owned job disappeared");
            return Ok(self.release(PollOutcome::TimedOut(job_id)));
        };

        if job.authorization.worker_public_key.as_deref() != Some(our_key.as_slice()) {
            return Ok(self.abandon(job_id, "worker public key does not match this claim"));
        }

        match job.state() {
            JobState::CredsEncrypted => {
                if !job.authorization.has_encrypted_credentials() {
                    return Ok(self.abandon(job_id, "encrypted credentials missing"));
                }
                info!(job_id = %job_id, "credentials arrived");
                match std::mem::replace(&mut self.mode, Mode::Searching) {
                    Mode::Owning(claimed) => Ok(PollOutcome::Ready(claimed, job)),
                    Mode::Searching => Ok(PollOutcome::Idle),
                }
            }
            JobState::TimedOut => {
                warn!(job_id = %job_id, "claim timed out");
                Ok(self.release(PollOutcome::TimedOut(job_id)))
            }
            state if state.is_awaiting_credentials() => {
                if self.is_stale(claimed_at) {
                    warn!(job_id = %job_id, state = %state, "gave up waiting for credentials");
                    self.mark_timed_out(job, state);
                    return Ok(self.release(PollOutcome::TimedOut(job_id)));
                }
                debug!(job_id = %job_id, state = %state, "waiting for credentials");
                Ok(PollOutcome::Waiting(job_id))
            }
            state => Ok(self.abandon(job_id, &format!("unexpected state {state}"))),
        }
    }

    fn is_stale(&self, claimed_at: DateTime<Utc>) -> bool {
        let Some(ttl) = self.claim_ttl else {
            return false;
        };
        let waited = Utc::now().signed_duration_since(claimed_at);
        waited.to_std().is_ok_and(|w| w >= ttl)
    }

    fn mark_timed_out(&self, mut job: Job, state: JobState) {
        let job_id = job.id;
        if job.transition(JobState::TimedOut).is_err() {
            return;
        }
        let precondition = UpdatePrecondition::state_is(state);
        if let Err(e) = self.store.update_job(job_id, &job, Some(precondition)) {
            debug!(job_id = %job_id, error = %e, "could not mark job timed out");
        }
    }

    fn abandon(&mut self, job_id: JobId, reason: &str) -> PollOutcome {
        warn!(job_id = %job_id, reason, "abandoning job");
        self.release(PollOutcome::Abandoned {
            job_id,
            reason: reason.to_string(),
        })
    }

    fn release(&mut self, outcome: PollOutcome) -> PollOutcome {
        self.mode = Mode::Searching;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::store::tests::job_in;

    const BITS: usize = 1024;

    fn poller(store: &Arc<InMemoryJobStore>, ttl: Option<Duration>) -> JobPoller<Arc<InMemoryJobStore>> {
        JobPoller::new(store.clone(), BITS, ttl)
    }

    fn deliver_credentials(store: &InMemoryJobStore, id: JobId) {
        let mut job = store.find_job(id).unwrap().unwrap();
        job.authorization.outer_key_encrypted_with_worker_key = Some(vec![1]);
        job.authorization.export_auth_data_encrypted = Some(vec![2]);
        job.authorization.import_auth_data_encrypted = Some(vec![3]);
        job.transition(JobState::CredsEncrypted).unwrap();
        store.update_job(id, &job, None).unwrap();
    }

    #[test]
    fn idle_when_nothing_is_available() {
        let store = InMemoryJobStore::arc();
        store.create_job(job_in(JobState::Initial)).unwrap();
        assert!(matches!(poller(&store, None).poll_once().unwrap(), PollOutcome::Idle));
    }

    #[test]
    fn claim_then_wait_then_ready() {
        let store = InMemoryJobStore::arc();
        let id = store.create_job(job_in(JobState::CredsAvailable)).unwrap();
        let mut p = poller(&store, None);

        assert!(matches!(p.poll_once().unwrap(), PollOutcome::Claimed(j) if j == id));
        let stored = store.find_job(id).unwrap().unwrap();
        assert_eq!(stored.state(), JobState::CredsEncryptionKeyGenerated);
        assert!(stored.authorization.claimed_at.is_some());
        assert_eq!(p.owned_job(), Some(id));

        assert!(matches!(p.poll_once().unwrap(), PollOutcome::Waiting(_)));

        deliver_credentials(&store, id);
        match p.poll_once().unwrap() {
            PollOutcome::Ready(claimed, job) => {
                assert_eq!(claimed.job_id, id);
                assert_eq!(
                    job.authorization.worker_public_key.unwrap(),
                    claimed.key_pair.public_key_der().unwrap()
                );
            }
            other => panic!("expected ready, got {other:?}"),
        }
        assert!(p.is_searching());
    }

    #[test]
    fn owned_job_only_is_polled() {
        let store = InMemoryJobStore::arc();
        let id = store.create_job(job_in(JobState::CredsAvailable)).unwrap();
        let mut p = poller(&store, None);
        p.poll_once().unwrap();

        let other = store.create_job(job_in(JobState::CredsAvailable)).unwrap();
        assert!(matches!(p.poll_once().unwrap(), PollOutcome::Waiting(j) if j == id));
        assert_eq!(
            store.find_job(other).unwrap().unwrap().state(),
            JobState::CredsAvailable
        );
    }

    #[test]
    fn missing_credentials_abandon_the_job() {
        let store = InMemoryJobStore::arc();
        let id = store.create_job(job_in(JobState::CredsAvailable)).unwrap();
        let mut p = poller(&store, None);
        p.poll_once().unwrap();

        let mut job = store.find_job(id).unwrap().unwrap();
        job.transition(JobState::CredsEncrypted).unwrap();
        store.update_job(id, &job, None).unwrap();

        assert!(matches!(
            p.poll_once().unwrap(),
            PollOutcome::Abandoned { job_id, .. } if job_id == id
        ));
        assert!(p.is_searching());
    }

    #[test]
    fn stale_claim_times_out() {
        let store = InMemoryJobStore::arc();
        let id = store.create_job(job_in(JobState::CredsAvailable)).unwrap();
        let mut p = poller(&store, Some(Duration::from_millis(20)));
        p.poll_once().unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(matches!(p.poll_once().unwrap(), PollOutcome::TimedOut(j) if j == id));
        assert_eq!(store.find_job(id).unwrap().unwrap().state(), JobState::TimedOut);
    }

    #[test]
    fn removed_job_releases_the_claim() {
        let store = InMemoryJobStore::arc();
        let id = store.create_job(job_in(JobState::CredsAvailable)).unwrap();
        let mut p = poller(&store, None);
        p.poll_once().unwrap();

        store.remove_job(id).unwrap();
        assert!(matches!(p.poll_once().unwrap(), PollOutcome::TimedOut(_)));
        assert!(p.is_searching());
    }

    #[test]
    fn exactly_one_of_two_racing_workers_wins() {
        let store = InMemoryJobStore::arc();
        let id = store.create_job(job_in(JobState::CredsAvailable)).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let key_pair = WorkerKeyPair::generate_with_bits(BITS).unwrap();
                    let der = key_pair.public_key_der().unwrap();
                    let p = JobPoller::new(store, BITS, None);
                    barrier.wait();
                    (p.claim_with(id, key_pair).unwrap(), der)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results
            .iter()
            .filter(|(outcome, _)| matches!(outcome, ClaimOutcome::Claimed(_)))
            .collect();
        assert_eq!(winners.len(), 1);

        let stored = store.find_job(id).unwrap().unwrap();
        assert_eq!(stored.state(), JobState::CredsEncryptionKeyGenerated);
        assert_eq!(stored.authorization.worker_public_key.as_ref(), Some(&winners[0].1));
    }

    #[test]
    fn claim_never_overwrites_a_published_key() {
        let store = InMemoryJobStore::arc();
        let mut job = job_in(JobState::CredsAvailable);
        job.authorization.worker_public_key = Some(vec![9, 9]);
        let id = store.create_job(job).unwrap();

        let p = poller(&store, None);
        let outcome = p
            .claim_with(id, WorkerKeyPair::generate_with_bits(BITS).unwrap())
            .unwrap();
        assert!(matches!(outcome, ClaimOutcome::Conflict));
        assert_eq!(
            store.find_job(id).unwrap().unwrap().authorization.worker_public_key,
            Some(vec![9, 9])
        );
    }
}
