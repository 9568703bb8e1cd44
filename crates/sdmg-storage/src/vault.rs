// Vault for upstream secrets at rest
// Decision: AES-256-GCM with a single process-wide key from configuration
// Decision: ciphertext layout is base64(NONCE || AUTH_TAG || CIPHERTEXT)

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// Vault failures. Key material never appears in messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("Encryption key must be {} hex characters", KEY_SIZE * 2)]
    KeyInvalid,
    #[error("Encryption failed")]
    EncryptFailed,
    #[error("Decryption failed")]
    DecryptFailed,
}

/// AEAD vault for secrets stored in connection rows.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Create from a 64-hex-character key string.
    pub fn new(hex_key: &str) -> Result<Self, VaultError> {
        let key_bytes = hex::decode(hex_key).map_err(|_| VaultError::KeyInvalid)?;
        if key_bytes.len() != KEY_SIZE {
            return Err(VaultError::KeyInvalid);
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| VaultError::KeyInvalid)?;
        Ok(Self { cipher })
    }

    /// Encrypt a secret, returning the base64 envelope for column storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; the stored layout wants
        // it up front, between nonce and ciphertext.
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptFailed)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        let mut envelope = Vec::with_capacity(NONCE_SIZE + sealed.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(tag);
        envelope.extend_from_slice(ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Decrypt a base64 envelope produced by `encrypt`.
    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        let envelope = BASE64.decode(encoded).map_err(|_| VaultError::DecryptFailed)?;
        if envelope.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::DecryptFailed);
        }

        let (nonce_bytes, rest) = envelope.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut sealed = Vec::with_capacity(rest.len());
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let plaintext = self
            .cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| VaultError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptFailed)
    }
}

/// Generate a fresh random key in the configuration format (64 hex chars).
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}
