//! Two-layer credential protocol.
//!
//! Sealing (done outside the worker):
//! 1. inner: `AuthData` JSON sealed with the per-job session key, which is
//!    stored in the job record;
//! 2. outer: once a worker has claimed the job, each inner blob is sealed
//!    again with a fresh outer key, and the outer key is RSA-encrypted to the
//!    worker's published public key.
//!
//! Unwrapping reverses this and needs the worker's in-memory private key, so
//! neither the store nor another worker can read the credentials.

use portage_core::{AuthData, JobAuthorization};
use tracing::debug;

use crate::error::{CredentialError, DecryptStage};
use crate::keys::{SymmetricKey, WorkerKeyPair, encrypt_to_worker};

/// Scheme identifier recorded in `JobAuthorization::encryption_scheme`.
pub const ENCRYPTION_SCHEME: &str = "aes256gcm+rsa-oaep-sha256";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CredentialSide {
    Export,
    Import,
}

impl CredentialSide {
    fn field(self) -> &'static str {
        match self {
            CredentialSide::Export => "export_auth_data_encrypted",
            CredentialSide::Import => "import_auth_data_encrypted",
        }
    }
}

/// Inner layer: serialize and seal `auth` with the session key.
pub fn seal_inner(session_key: &SymmetricKey, auth: &AuthData) -> Result<Vec<u8>, CredentialError> {
    let json = auth
        .to_json_bytes()
        .map_err(|e| CredentialError::Encryption(e.to_string()))?;
    session_key
        .seal(&json)
        .map_err(|e| CredentialError::Encryption(e.to_string()))
}

/// Output of the outer layer, ready to be written to the job record.
#[derive(Debug, Clone)]
pub struct SealedCredentials {
    pub outer_key_encrypted: Vec<u8>,
    pub export_auth_data_encrypted: Vec<u8>,
    pub import_auth_data_encrypted: Vec<u8>,
}

impl SealedCredentials {
    pub fn apply_to(self, authorization: &mut JobAuthorization) {
        authorization.outer_key_encrypted_with_worker_key = Some(self.outer_key_encrypted);
        authorization.export_auth_data_encrypted = Some(self.export_auth_data_encrypted);
        authorization.import_auth_data_encrypted = Some(self.import_auth_data_encrypted);
    }
}

/// Outer layer: seal both inner blobs with a fresh outer key and wrap that
/// key for the claiming worker.
pub fn seal_outer(
    worker_public_key_der: &[u8],
    export_inner: &[u8],
    import_inner: &[u8],
) -> Result<SealedCredentials, CredentialError> {
    let outer = SymmetricKey::generate();
    let enc = |e: crate::error::CipherError| CredentialError::Encryption(e.to_string());

    Ok(SealedCredentials {
        outer_key_encrypted: encrypt_to_worker(worker_public_key_der, outer.as_bytes())
            .map_err(enc)?,
        export_auth_data_encrypted: outer.seal(export_inner).map_err(enc)?,
        import_auth_data_encrypted: outer.seal(import_inner).map_err(enc)?,
    })
}

/// Both sides' credentials, decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrappedCredentials {
    pub export: AuthData,
    pub import: AuthData,
}

/// Worker-side decryption using the claimant's private key.
#[derive(Debug)]
pub struct CredentialUnwrapper<'a> {
    key_pair: &'a WorkerKeyPair,
}

impl<'a> CredentialUnwrapper<'a> {
    pub fn new(key_pair: &'a WorkerKeyPair) -> Self {
        Self { key_pair }
    }

    pub fn unwrap(
        &self,
        authorization: &JobAuthorization,
    ) -> Result<UnwrappedCredentials, CredentialError> {
        let outer = self.outer_key(authorization)?;
        let session = session_key(authorization)?;

        let export_json = self.open_side(authorization, &outer, &session, CredentialSide::Export)?;
        let import_json = self.open_side(authorization, &outer, &session, CredentialSide::Import)?;
        let export = decode(&export_json)?;
        let import = decode(&import_json)?;
        debug!(
            export_kind = export.kind(),
            import_kind = import.kind(),
            "credentials unwrapped"
        );
        Ok(UnwrappedCredentials { export, import })
    }

    /// Serialized `AuthData` for one side, before deserialization.
    pub fn unwrap_serialized(
        &self,
        authorization: &JobAuthorization,
        side: CredentialSide,
    ) -> Result<Vec<u8>, CredentialError> {
        let outer = self.outer_key(authorization)?;
        let session = session_key(authorization)?;
        self.open_side(authorization, &outer, &session, side)
    }

    fn outer_key(&self, authorization: &JobAuthorization) -> Result<SymmetricKey, CredentialError> {
        if authorization.encryption_scheme != ENCRYPTION_SCHEME {
            return Err(CredentialError::decryption(
                DecryptStage::Record,
                format!(
                    "unsupported encryption scheme {:?}",
                    authorization.encryption_scheme
                ),
            ));
        }
        let wrapped = required(
            &authorization.outer_key_encrypted_with_worker_key,
            "outer_key_encrypted_with_worker_key",
        )?;
        let raw = self
            .key_pair
            .decrypt(wrapped)
            .map_err(|e| CredentialError::decryption(DecryptStage::OuterKey, e.to_string()))?;
        SymmetricKey::from_bytes(&raw)
            .map_err(|e| CredentialError::decryption(DecryptStage::OuterKey, e.to_string()))
    }

    fn open_side(
        &self,
        authorization: &JobAuthorization,
        outer: &SymmetricKey,
        session: &SymmetricKey,
        side: CredentialSide,
    ) -> Result<Vec<u8>, CredentialError> {
        let field = match side {
            CredentialSide::Export => &authorization.export_auth_data_encrypted,
            CredentialSide::Import => &authorization.import_auth_data_encrypted,
        };
        let doubly = required(field, side.field())?;
        let once = outer
            .open(doubly)
            .map_err(|e| CredentialError::decryption(DecryptStage::OuterLayer, e.to_string()))?;
        session
            .open(&once)
            .map_err(|e| CredentialError::decryption(DecryptStage::InnerLayer, e.to_string()))
    }
}

fn session_key(authorization: &JobAuthorization) -> Result<SymmetricKey, CredentialError> {
    SymmetricKey::from_bytes(&authorization.session_secret_key)
        .map_err(|e| CredentialError::decryption(DecryptStage::SessionKey, e.to_string()))
}

fn required<'f>(field: &'f Option<Vec<u8>>, name: &str) -> Result<&'f [u8], CredentialError> {
    match field {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(CredentialError::decryption(
            DecryptStage::Record,
            format!("missing {name}"),
        )),
    }
}

fn decode(bytes: &[u8]) -> Result<AuthData, CredentialError> {
    AuthData::from_json_bytes(bytes)
        .map_err(|e| CredentialError::decryption(DecryptStage::Deserialize, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::tests::{TEST_BITS, shared_key_pair};

    fn sealed_authorization(
        pair: &WorkerKeyPair,
        export: &AuthData,
        import: &AuthData,
    ) -> JobAuthorization {
        let session = SymmetricKey::generate();
        let mut auth = JobAuthorization::new(session.to_vec(), ENCRYPTION_SCHEME);
        let sealed = seal_outer(
            &pair.public_key_der().unwrap(),
            &seal_inner(&session, export).unwrap(),
            &seal_inner(&session, import).unwrap(),
        )
        .unwrap();
        sealed.apply_to(&mut auth);
        auth
    }

    #[test]
    fn unwrap_yields_byte_identical_auth_data() {
        let pair = shared_key_pair();
        let export = AuthData::token("t");
        let import = AuthData::TokensAndUrl {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_server_url: "https://tokens.example".into(),
        };
        let auth = sealed_authorization(pair, &export, &import);
        let unwrapper = CredentialUnwrapper::new(pair);

        let bytes = unwrapper
            .unwrap_serialized(&auth, CredentialSide::Export)
            .unwrap();
        assert_eq!(bytes, export.to_json_bytes().unwrap());

        let creds = unwrapper.unwrap(&auth).unwrap();
        assert_eq!(creds.export, export);
        assert_eq!(creds.import, import);
    }

    #[test]
    fn another_private_key_fails_at_outer_key() {
        let owner = shared_key_pair();
        let auth = sealed_authorization(owner, &AuthData::token("t"), &AuthData::token("u"));

        let intruder = WorkerKeyPair::generate_with_bits(TEST_BITS).unwrap();
        for _ in 0..3 {
            let err = CredentialUnwrapper::new(&intruder).unwrap(&auth).unwrap_err();
            assert!(err.is_decryption_failure());
            assert_eq!(err.stage(), Some(DecryptStage::OuterKey));
        }
    }

    #[test]
    fn wrong_session_key_fails_at_inner_layer() {
        let pair = shared_key_pair();
        let mut auth = sealed_authorization(pair, &AuthData::token("t"), &AuthData::token("u"));
        auth.session_secret_key = SymmetricKey::generate().to_vec();

        let err = CredentialUnwrapper::new(pair).unwrap(&auth).unwrap_err();
        assert_eq!(err.stage(), Some(DecryptStage::InnerLayer));
    }

    #[test]
    fn tampered_blob_fails_at_outer_layer() {
        let pair = shared_key_pair();
        let mut auth = sealed_authorization(pair, &AuthData::token("t"), &AuthData::token("u"));
        if let Some(blob) = auth.import_auth_data_encrypted.as_mut() {
            let last = blob.len() - 1;
            blob[last] ^= 0x01;
        }

        let err = CredentialUnwrapper::new(pair).unwrap(&auth).unwrap_err();
        assert_eq!(err.stage(), Some(DecryptStage::OuterLayer));
    }

    #[test]
    fn missing_fields_and_foreign_schemes_are_record_failures() {
        let pair = shared_key_pair();
        let mut auth = sealed_authorization(pair, &AuthData::token("t"), &AuthData::token("u"));
        auth.export_auth_data_encrypted = None;
        let err = CredentialUnwrapper::new(pair).unwrap(&auth).unwrap_err();
        assert_eq!(err.stage(), Some(DecryptStage::Record));

        let mut auth = sealed_authorization(pair, &AuthData::token("t"), &AuthData::token("u"));
        auth.encryption_scheme = "jwe".into();
        let err = CredentialUnwrapper::new(pair).unwrap(&auth).unwrap_err();
        assert_eq!(err.stage(), Some(DecryptStage::Record));
    }

    #[test]
    fn non_auth_plaintext_fails_at_deserialize() {
        let pair = shared_key_pair();
        let session = SymmetricKey::generate();
        let mut auth = JobAuthorization::new(session.to_vec(), ENCRYPTION_SCHEME);
        let junk = session.seal(b"not json").unwrap();
        seal_outer(&pair.public_key_der().unwrap(), &junk, &junk)
            .unwrap()
            .apply_to(&mut auth);

        let err = CredentialUnwrapper::new(pair).unwrap(&auth).unwrap_err();
        assert_eq!(err.stage(), Some(DecryptStage::Deserialize));
    }
}
