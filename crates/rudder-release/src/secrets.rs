//! Encryption of sensitive variable values
//!
//! Ciphertexts are `base64(nonce ‖ aes-256-gcm(plaintext))`.

use crate::error::{ReleaseError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts sensitive values
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// AES-256-GCM cipher with a random nonce per value
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build from a base64-encoded 32-byte key
    pub fn from_base64(key: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| ReleaseError::Secret(format!("invalid key encoding: {}", e)))?;
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|_| ReleaseError::Secret("key must be 32 bytes".into()))?;
        Ok(Self { cipher })
    }

    /// Cipher with a fresh random key; values do not survive a restart
    pub fn ephemeral() -> Self {
        Self::new(&rand::random::<[u8; 32]>())
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher(..)")
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = rand::random::<[u8; NONCE_LEN]>();
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| ReleaseError::Secret("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(ciphertext)
            .map_err(|e| ReleaseError::Secret(format!("invalid ciphertext encoding: {}", e)))?;
        if bytes.len() < NONCE_LEN {
            return Err(ReleaseError::Secret("ciphertext too short".into()));
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| ReleaseError::Secret("decryption failed".into()))?;
        String::from_utf8(plain)
            .map_err(|_| ReleaseError::Secret("plaintext is not valid UTF-8".into()))
    }
}
