//! Transfer job record and its authorization state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::{base64_bytes, base64_bytes_opt};
use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Authorization state of a job.
///
/// States advance strictly forward; `TimedOut` is the only side exit and is
/// reachable only while a claim is waiting for credentials.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// OAuth flows with the end user are still in progress.
    Initial,
    /// Credentials exist upstream; waiting for a worker to claim the job.
    CredsAvailable,
    /// A worker claimed the job and published its public key.
    CredsEncryptionKeyGenerated,
    /// Upstream has started storing credentials for the claimant.
    CredsStored,
    /// Doubly-encrypted credentials are in the record; the worker may start.
    CredsEncrypted,
    /// The claim went stale before credentials arrived.
    TimedOut,
}

impl JobState {
    fn ordinal(self) -> Option<u8> {
        match self {
            JobState::Initial => Some(0),
            JobState::CredsAvailable => Some(1),
            JobState::CredsEncryptionKeyGenerated => Some(2),
            JobState::CredsStored => Some(3),
            JobState::CredsEncrypted => Some(4),
            JobState::TimedOut => None,
        }
    }

    /// Whether `self -> next` is a legal move.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if next == JobState::TimedOut {
            return self.is_awaiting_credentials();
        }
        match (self.ordinal(), next.ordinal()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }

    /// Claimed, but the encrypted credentials have not arrived yet.
    pub fn is_awaiting_credentials(self) -> bool {
        matches!(
            self,
            JobState::CredsEncryptionKeyGenerated | JobState::CredsStored
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::CredsEncrypted | JobState::TimedOut)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            JobState::Initial => "INITIAL",
            JobState::CredsAvailable => "CREDS_AVAILABLE",
            JobState::CredsEncryptionKeyGenerated => "CREDS_ENCRYPTION_KEY_GENERATED",
            JobState::CredsStored => "CREDS_STORED",
            JobState::CredsEncrypted => "CREDS_ENCRYPTED",
            JobState::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Credential material attached to a job.
///
/// Byte fields serialize as base64 strings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAuthorization {
    pub state: JobState,
    /// Per-job symmetric key of the inner layer.
    #[serde(with = "base64_bytes")]
    pub session_secret_key: Vec<u8>,
    /// Encoded public key of the claiming worker; set at most once.
    #[serde(default, with = "base64_bytes_opt")]
    pub worker_public_key: Option<Vec<u8>>,
    #[serde(default, with = "base64_bytes_opt")]
    pub outer_key_encrypted_with_worker_key: Option<Vec<u8>>,
    #[serde(default, with = "base64_bytes_opt")]
    pub export_auth_data_encrypted: Option<Vec<u8>>,
    #[serde(default, with = "base64_bytes_opt")]
    pub import_auth_data_encrypted: Option<Vec<u8>>,
    pub encryption_scheme: String,
    /// When the current claim was made. Drives stale-claim reaping.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl JobAuthorization {
    pub fn new(session_secret_key: Vec<u8>, encryption_scheme: impl Into<String>) -> Self {
        Self {
            state: JobState::Initial,
            session_secret_key,
            worker_public_key: None,
            outer_key_encrypted_with_worker_key: None,
            export_auth_data_encrypted: None,
            import_auth_data_encrypted: None,
            encryption_scheme: encryption_scheme.into(),
            claimed_at: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.worker_public_key.is_some()
    }

    /// Both encrypted credential blobs and the wrapped outer key are present.
    pub fn has_encrypted_credentials(&self) -> bool {
        fn present(field: &Option<Vec<u8>>) -> bool {
            field.as_ref().is_some_and(|b| !b.is_empty())
        }
        present(&self.export_auth_data_encrypted)
            && present(&self.import_auth_data_encrypted)
            && present(&self.outer_key_encrypted_with_worker_key)
    }
}

// Key material stays out of logs; only lengths are shown.
impl core::fmt::Debug for JobAuthorization {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let len = |b: &Option<Vec<u8>>| b.as_ref().map(Vec::len);
        f.debug_struct("JobAuthorization")
            .field("state", &self.state)
            .field("session_secret_key_len", &self.session_secret_key.len())
            .field("worker_public_key_len", &len(&self.worker_public_key))
            .field(
                "outer_key_encrypted_len",
                &len(&self.outer_key_encrypted_with_worker_key),
            )
            .field("export_auth_data_len", &len(&self.export_auth_data_encrypted))
            .field("import_auth_data_len", &len(&self.import_auth_data_encrypted))
            .field("encryption_scheme", &self.encryption_scheme)
            .field("claimed_at", &self.claimed_at)
            .finish()
    }
}

/// One user-initiated transfer between an export and an import service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub export_service: String,
    pub import_service: String,
    pub data_type: String,
    pub authorization: JobAuthorization,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        export_service: impl Into<String>,
        import_service: impl Into<String>,
        data_type: impl Into<String>,
        authorization: JobAuthorization,
    ) -> Self {
        Self {
            id: JobId::new(),
            export_service: export_service.into(),
            import_service: import_service.into(),
            data_type: data_type.into(),
            authorization,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn state(&self) -> JobState {
        self.authorization.state
    }

    /// Advance the authorization state, rejecting backwards or skipped-to-terminal moves.
    pub fn transition(&mut self, next: JobState) -> DomainResult<()> {
        let current = self.authorization.state;
        if !current.can_transition_to(next) {
            return Err(DomainError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.authorization.state = next;
        Ok(())
    }

    /// Record a worker claim: publish the key and move to `CREDS_ENCRYPTION_KEY_GENERATED`.
    ///
    /// Fails if a worker key is already present; the key is write-once.
    pub fn claim(&mut self, worker_public_key: Vec<u8>, at: DateTime<Utc>) -> DomainResult<()> {
        if self.authorization.is_claimed() {
            return Err(DomainError::invariant("worker public key already set"));
        }
        self.transition(JobState::CredsEncryptionKeyGenerated)?;
        self.authorization.worker_public_key = Some(worker_public_key);
        self.authorization.claimed_at = Some(at);
        Ok(())
    }
}
