//! Encryption of stored credentials.
//!
//! AES-256-GCM with a key derived per secret:
//!
//! ```text
//! master key ─┬─► HKDF-SHA256 ─► per-secret key
//! random salt ┘
//! ```
//!
//! Stored value is `nonce || ciphertext || tag`, with the salt kept alongside.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 32;
const TAG_SIZE: usize = 16;
const HKDF_INFO: &[u8] = b"prforge-credentials-v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Master key must be at least {KEY_SIZE} bytes")]
    InvalidMasterKey,

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

pub struct SecretsCrypto {
    master_key: SecretString,
}

impl SecretsCrypto {
    pub fn new(master_key: SecretString) -> Result<Self, CryptoError> {
        if master_key.expose_secret().len() < KEY_SIZE {
            return Err(CryptoError::InvalidMasterKey);
        }
        Ok(Self { master_key })
    }

    /// Returns `(nonce || ciphertext, salt)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let mut salt = vec![0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let cipher = self.cipher(&salt).map_err(CryptoError::Encrypt)?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok((sealed, salt))
    }

    pub fn decrypt(&self, sealed: &[u8], salt: &[u8]) -> Result<String, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decrypt("value too short".to_string()));
        }
        let cipher = self.cipher(salt).map_err(CryptoError::Decrypt)?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm, String> {
        let hk = Hkdf::<Sha256>::new(Some(salt), self.master_key.expose_secret().as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|_| "HKDF expansion failed".to_string())?;
        Aes256Gcm::new_from_slice(&key).map_err(|e| e.to_string())
    }
}

impl std::fmt::Debug for SecretsCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsCrypto")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}
