//! `portage-security`: credential protection for transfer jobs.
//!
//! The worker generates a key pair per claim, publishes the public half in the
//! job record, and is the only party able to unwrap the credentials that an
//! upstream actor seals for it.

pub mod error;
pub mod keys;
pub mod protocol;

pub use error::{CipherError, CredentialError, DecryptStage};
pub use keys::{DEFAULT_RSA_BITS, SymmetricKey, WorkerKeyPair, encrypt_to_worker, fingerprint};
pub use protocol::{
    CredentialSide, CredentialUnwrapper, ENCRYPTION_SCHEME, SealedCredentials,
    UnwrappedCredentials, seal_inner, seal_outer,
};
