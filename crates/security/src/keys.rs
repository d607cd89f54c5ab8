//! Key material: per-job symmetric keys and the worker's RSA key pair.
//!
//! Symmetric ciphertexts are laid out as `nonce (12 bytes) || AES-256-GCM
//! ciphertext+tag`. Worker public keys travel as DER `SubjectPublicKeyInfo`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{CipherError, CredentialError};

pub const SYMMETRIC_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Default worker key size.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// AES-256-GCM key used for the inner (session) and outer layers.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let arr: [u8; SYMMETRIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            CipherError::InvalidKey(format!(
                "expected {SYMMETRIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn cipher(&self) -> Result<Aes256Gcm, CipherError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|e| CipherError::InvalidKey(e.to_string()))
    }

    /// Encrypt under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt and authenticate. A wrong key or tampered input is `Rejected`.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() <= NONCE_LEN {
            return Err(CipherError::Rejected);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Rejected)
    }
}

impl core::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// The worker's asymmetric key pair. Lives in process memory only.
#[derive(Clone)]
pub struct WorkerKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl WorkerKeyPair {
    pub fn generate() -> Result<Self, CredentialError> {
        Self::generate_with_bits(DEFAULT_RSA_BITS)
    }

    pub fn generate_with_bits(bits: usize) -> Result<Self, CredentialError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CredentialError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// DER-encoded public key, as published in the job record.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CredentialError> {
        let doc = self
            .public
            .to_public_key_der()
            .map_err(|e| CredentialError::KeyGeneration(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Short, non-secret identifier for logs.
    pub fn fingerprint(&self) -> String {
        self.public_key_der()
            .map(|der| fingerprint(&der))
            .unwrap_or_else(|_| "<unencodable>".to_string())
    }

    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| CipherError::Rejected)
    }
}

impl core::fmt::Debug for WorkerKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// RSA-OAEP encrypt `plaintext` to the holder of `public_key_der`.
pub fn encrypt_to_worker(public_key_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let public = RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|_| CipherError::Encrypt)
}

pub fn fingerprint(public_key_der: &[u8]) -> String {
    let digest = Sha256::digest(public_key_der);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
