//! Application configuration settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::tokens::{TenantSlot, REFRESH_WINDOW};
use crate::error::{AuthError, Result};

/// Main configuration for tenantlink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantLinkConfig {
    /// Identity provider and tenant bindings.
    pub auth: AuthConfig,
    /// Credential storage settings.
    pub storage: StorageConfig,
    /// Background refresh settings.
    pub refresh: RefreshConfig,
}

/// Identity provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth client ID, shared by both tenants.
    pub client_id: String,
    /// Tenant bound to the source slot.
    pub source_tenant_id: String,
    /// Tenant bound to the target slot.
    pub target_tenant_id: String,
    /// Authority base URL; tenant-scoped endpoints hang off it.
    #[serde(with = "url_serde")]
    pub authority: Url,
    /// Scopes requested for both tenants.
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            source_tenant_id: String::new(),
            target_tenant_id: String::new(),
            authority: Url::parse("https://login.microsoftonline.com")
                .expect("valid default URL"),
            scopes: vec![
                "https://graph.microsoft.com/.default".to_string(),
                "offline_access".to_string(),
            ],
        }
    }
}

impl AuthConfig {
    /// Tenant ID bound to `slot`.
    #[must_use]
    pub fn tenant_for(&self, slot: TenantSlot) -> &str {
        match slot {
            TenantSlot::Source => &self.source_tenant_id,
            TenantSlot::Target => &self.target_tenant_id,
        }
    }

    /// Checks that both slots are bound and point at distinct tenants.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config(
                "auth.client_id is not set (or TENANTLINK_CLIENT_ID)".to_string(),
            ));
        }

        for slot in TenantSlot::ALL {
            if self.tenant_for(slot).trim().is_empty() {
                return Err(AuthError::Config(format!(
                    "auth.{slot}_tenant_id is not set"
                )));
            }
        }

        if self.source_tenant_id == self.target_tenant_id {
            return Err(AuthError::Config(
                "source and target must be bound to different tenants".to_string(),
            ));
        }

        Ok(())
    }
}

/// Credential storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Token directory override. Defaults to `<data_dir>/tenantlink/tokens`.
    pub dir: Option<PathBuf>,
}

/// Background refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between auto-refresh ticks.
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 240 }
    }
}

impl RefreshConfig {
    /// Tick period as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The interval must be non-zero and shorter than the refresh window,
    /// otherwise a credential could expire between two ticks.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 || self.interval() >= REFRESH_WINDOW {
            return Err(AuthError::Config(format!(
                "refresh.interval_secs must be between 1 and {}",
                REFRESH_WINDOW.as_secs() - 1
            )));
        }
        Ok(())
    }
}

/// Custom serde module for URL serialization.
mod url_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use url::Url;

    pub fn serialize<S>(url: &Url, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(url.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Url, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Url::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Environment variables that can override configuration.
pub mod env {
    pub const CLIENT_ID: &str = "TENANTLINK_CLIENT_ID";
    pub const SOURCE_TENANT: &str = "TENANTLINK_SOURCE_TENANT";
    pub const TARGET_TENANT: &str = "TENANTLINK_TARGET_TENANT";
    pub const AUTHORITY: &str = "TENANTLINK_AUTHORITY";
    pub const TOKEN_DIR: &str = "TENANTLINK_TOKEN_DIR";
    pub const LOG_LEVEL: &str = "TENANTLINK_LOG";
}

impl TenantLinkConfig {
    /// Apply environment variable overrides to the configuration.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(client_id) = std::env::var(env::CLIENT_ID) {
            self.auth.client_id = client_id;
        }

        if let Ok(tenant) = std::env::var(env::SOURCE_TENANT) {
            self.auth.source_tenant_id = tenant;
        }

        if let Ok(tenant) = std::env::var(env::TARGET_TENANT) {
            self.auth.target_tenant_id = tenant;
        }

        if let Ok(url) = std::env::var(env::AUTHORITY) {
            if let Ok(parsed) = Url::parse(&url) {
                self.auth.authority = parsed;
            }
        }

        if let Ok(dir) = std::env::var(env::TOKEN_DIR) {
            self.storage.dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Validate everything needed before authenticating.
    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        self.refresh.validate()
    }
}
