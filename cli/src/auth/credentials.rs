//! Encrypted credential storage, one record per tenant slot.
//!
//! - [`CredentialStore`] - Trait for slot-scoped credential persistence
//! - [`FileCredentialStore`] - One encrypted file per slot under a token directory
//!
//! # Security
//!
//! - Records are sealed with [`TokenCipher`] before they touch disk
//! - Files are created with 0600 permissions on Unix
//! - Writes are atomic (temp file, fsync, rename), so an aborted store leaves
//!   the previous record intact
//! - A record that fails to decrypt is reported as [`AuthError::Decryption`],
//!   never as "no credential"

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::auth::encryption::TokenCipher;
use crate::auth::tokens::{Credential, TenantSlot};
use crate::config::paths::tokens_dir;
use crate::error::{AuthError, Result};

/// Trait for credential storage operations (enables mocking).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Encrypts and persists the credential for `slot`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on I/O failure.
    async fn store(&self, slot: TenantSlot, credential: &Credential) -> Result<()>;

    /// Loads the credential for `slot`, or `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Decryption`] if the record does not authenticate,
    /// or [`AuthError::Storage`] on I/O failure.
    async fn load(&self, slot: TenantSlot) -> Result<Option<Credential>>;

    /// Removes the record for `slot`. No-op if nothing is stored.
    async fn clear(&self, slot: TenantSlot) -> Result<()>;

    /// Removes the records for both slots.
    async fn clear_all(&self) -> Result<()> {
        for slot in TenantSlot::ALL {
            self.clear(slot).await?;
        }
        Ok(())
    }
}

/// File-based encrypted credential store.
#[derive(Debug)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
    cipher: TokenCipher,
    locks: HashMap<TenantSlot, Arc<Mutex<()>>>,
}

impl FileCredentialStore {
    /// Creates a store under the default token directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the token directory cannot be determined.
    pub fn new(cipher: TokenCipher) -> Result<Self> {
        Ok(Self::with_dir(tokens_dir()?, cipher))
    }

    /// Creates a store rooted at `base_dir`. The directory is created on first write.
    #[must_use]
    pub fn with_dir(base_dir: PathBuf, cipher: TokenCipher) -> Self {
        let locks = TenantSlot::ALL
            .into_iter()
            .map(|slot| (slot, Arc::new(Mutex::new(()))))
            .collect();

        Self {
            base_dir,
            cipher,
            locks,
        }
    }

    /// Directory holding the slot files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Gets the file path for a slot.
    #[must_use]
    pub fn slot_path(&self, slot: TenantSlot) -> PathBuf {
        self.base_dir.join(format!("{}.token", slot.as_str()))
    }

    fn lock_for(&self, slot: TenantSlot) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks[&slot])
    }

    async fn write_atomic(&self, path: &Path, blob: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| storage_error("cannot create token directory", &e))?;

        let temp_path = path.with_extension("tmp");

        let result = async {
            let mut options = tokio::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            options.mode(0o600);

            let mut file = options
                .open(&temp_path)
                .await
                .map_err(|e| storage_error("cannot create temp file", &e))?;
            file.write_all(blob)
                .await
                .map_err(|e| storage_error("cannot write credential", &e))?;
            file.sync_all()
                .await
                .map_err(|e| storage_error("cannot sync to disk", &e))?;
            drop(file);

            tokio::fs::rename(&temp_path, path)
                .await
                .map_err(|e| storage_error("cannot replace credential file", &e))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn store(&self, slot: TenantSlot, credential: &Credential) -> Result<()> {
        let blob = self.cipher.encrypt(credential)?;
        let path = self.slot_path(slot);

        let lock = self.lock_for(slot);
        let _guard = lock.lock().await;
        self.write_atomic(&path, &blob).await?;

        tracing::debug!(%slot, path = %path.display(), "Stored encrypted credential");
        Ok(())
    }

    async fn load(&self, slot: TenantSlot) -> Result<Option<Credential>> {
        let path = self.slot_path(slot);

        let blob = {
            let lock = self.lock_for(slot);
            let _guard = lock.lock().await;
            match tokio::fs::read(&path).await {
                Ok(blob) => blob,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(storage_error("cannot read credential", &e)),
            }
        };

        match self.cipher.decrypt(&blob) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                tracing::error!(%slot, error = %e, "Stored credential failed integrity check");
                Err(AuthError::Decryption(slot))
            },
        }
    }

    async fn clear(&self, slot: TenantSlot) -> Result<()> {
        let path = self.slot_path(slot);

        let lock = self.lock_for(slot);
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(%slot, "Cleared stored credential");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("cannot remove credential", &e)),
        }
    }
}

fn storage_error(context: &str, err: &std::io::Error) -> AuthError {
    AuthError::Storage(format!("{context}: {err}"))
}
