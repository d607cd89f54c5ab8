//! Credential protocol errors.

use thiserror::Error;

/// Which unwrap step rejected the input.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecryptStage {
    /// The job record is missing a field or names another scheme.
    Record,
    /// RSA decryption of the outer key.
    OuterKey,
    /// Symmetric decryption with the outer key.
    OuterLayer,
    /// Parsing the session key stored in the record.
    SessionKey,
    /// Symmetric decryption with the session key.
    InnerLayer,
    /// Decoding the serialized `AuthData`.
    Deserialize,
}

impl core::fmt::Display for DecryptStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DecryptStage::Record => "record",
            DecryptStage::OuterKey => "outer key",
            DecryptStage::OuterLayer => "outer layer",
            DecryptStage::SessionKey => "session key",
            DecryptStage::InnerLayer => "inner layer",
            DecryptStage::Deserialize => "deserialize",
        };
        f.write_str(s)
    }
}

/// Low-level cipher failure. Carries no detail on purpose: AEAD and OAEP
/// rejections must look identical to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("ciphertext rejected")]
    Rejected,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    Encrypt,
}

/// Errors raised while sealing or unwrapping job credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The ciphertext is presumed unrecoverable; the job must be abandoned.
    #[error("credential decryption failed at {stage}: {reason}")]
    DecryptionFailure { stage: DecryptStage, reason: String },

    #[error("credential encryption failed: {0}")]
    Encryption(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

impl CredentialError {
    pub fn decryption(stage: DecryptStage, reason: impl Into<String>) -> Self {
        Self::DecryptionFailure {
            stage,
            reason: reason.into(),
        }
    }

    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, CredentialError::DecryptionFailure { .. })
    }

    pub fn stage(&self) -> Option<DecryptStage> {
        match self {
            CredentialError::DecryptionFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
