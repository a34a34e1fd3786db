//! AES-256-GCM encryption for stored credentials.
//!
//! Each credential is serialized to JSON and sealed into one self-describing blob:
//!
//! ```text
//! nonce (12 bytes) || ciphertext || tag (16 bytes)
//! ```
//!
//! A fresh random nonce is drawn for every call. The tag covers the whole
//! serialized credential, so flipping any byte of the blob fails decryption.
//!
//! Key material is supplied from outside (environment variable or OS keyring);
//! this module never generates or persists a key.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyring::Entry;

use crate::auth::tokens::Credential;
use crate::error::{AuthError, Result};

/// Size of the encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM).
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Environment variable carrying the base64-encoded key.
pub const KEY_ENV: &str = "TENANTLINK_TOKEN_KEY";

const KEYRING_SERVICE: &str = "dev.tenantlink.cli";
const KEYRING_KEY: &str = "token_key";

/// Authenticated encryption of [`Credential`] records.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(<key>)")
    }
}

impl TokenCipher {
    /// Creates a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] unless `key` is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(AuthError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Creates a cipher from a base64-encoded key.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_base64.trim())
            .map_err(|e| AuthError::InvalidKey(format!("not valid base64: {e}")))?;
        Self::new(&key)
    }

    /// Resolves the key from `TENANTLINK_TOKEN_KEY`, falling back to the OS keyring.
    pub fn from_environment() -> Result<Self> {
        if let Ok(value) = std::env::var(KEY_ENV) {
            return Self::from_base64(&value);
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_KEY)?;
        match entry.get_password() {
            Ok(value) => Self::from_base64(&value),
            Err(keyring::Error::NoEntry) => Err(AuthError::InvalidKey(format!(
                "{KEY_ENV} is not set and no key is stored in the OS keyring"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Encrypts a credential into a `nonce || ciphertext || tag` blob.
    pub fn encrypt(&self, credential: &Credential) -> Result<Vec<u8>> {
        let plaintext = serde_json::to_vec(credential)?;

        // Never reuse a nonce under the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| AuthError::Cipher(format!("encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Cipher`] if the blob is truncated or the tag does
    /// not verify. No partially decrypted data is ever returned.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Credential> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(AuthError::Cipher(format!(
                "blob too short ({} bytes)",
                blob.len()
            )));
        }

        let (nonce, sealed) = blob.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| AuthError::Cipher("wrong key or corrupted data".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| AuthError::Cipher(format!("decrypted data is not a credential: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credential {
        Credential {
            access_token: "access-123".to_string(),
            refresh_token: "refresh-456".to_string(),
            expires_at: 1_700_000_000_000,
            tenant_id: "11111111-1111-1111-1111-111111111111".to_string(),
        }
    }

    #[test]
    fn key_validation() {
        assert!(TokenCipher::from_base64(&BASE64.encode([0u8; 32])).is_ok());
        assert!(TokenCipher::from_base64(&BASE64.encode([0u8; 16])).is_err());
        assert!(TokenCipher::from_base64(&BASE64.encode([0u8; 64])).is_err());
        assert!(TokenCipher::from_base64("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = TokenCipher::new(&[7u8; 32]).unwrap();
        let blob = cipher.encrypt(&sample()).unwrap();

        assert_eq!(blob.len(), NONCE_SIZE + serde_json::to_vec(&sample()).unwrap().len() + TAG_SIZE);
        assert_eq!(cipher.decrypt(&blob).unwrap(), sample());
    }

    #[test]
    fn ciphertext_does_not_contain_plaintext() {
        let cipher = TokenCipher::new(&[7u8; 32]).unwrap();
        let blob = cipher.encrypt(&sample()).unwrap();
        let needle = b"access-123";
        assert!(!blob.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn fresh_nonce_per_call() {
        let cipher = TokenCipher::new(&[7u8; 32]).unwrap();
        let a = cipher.encrypt(&sample()).unwrap();
        let b = cipher.encrypt(&sample()).unwrap();

        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let k1 = TokenCipher::new(&[1u8; 32]).unwrap();
        let k2 = TokenCipher::new(&[2u8; 32]).unwrap();
        let blob = k1.encrypt(&sample()).unwrap();

        assert!(matches!(k2.decrypt(&blob), Err(AuthError::Cipher(_))));
    }

    #[test]
    fn flipping_any_byte_fails() {
        let cipher = TokenCipher::new(&[9u8; 32]).unwrap();
        let blob = cipher.encrypt(&sample()).unwrap();

        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(cipher.decrypt(&tampered), Err(AuthError::Cipher(_))),
                "tampering byte {i} went undetected"
            );
        }
    }

    #[test]
    fn truncated_blob_fails() {
        let cipher = TokenCipher::new(&[9u8; 32]).unwrap();
        let blob = cipher.encrypt(&sample()).unwrap();

        assert!(cipher.decrypt(&blob[..NONCE_SIZE + TAG_SIZE - 1]).is_err());
        assert!(cipher.decrypt(&blob[..blob.len() - 1]).is_err());
        assert!(cipher.decrypt(&[]).is_err());
    }
}
