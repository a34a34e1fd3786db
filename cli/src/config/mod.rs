//! Configuration management for tenantlink.

pub mod paths;
pub mod settings;

pub use paths::config_file;
pub use settings::{AuthConfig, RefreshConfig, StorageConfig, TenantLinkConfig};

use std::path::Path;

use crate::error::{AuthError, Result};

/// Load configuration from the default config file.
///
/// If the config file doesn't exist, returns default configuration.
pub fn load_config() -> Result<TenantLinkConfig> {
    let path = config_file()?;
    load_config_from(&path)
}

/// Load configuration from a specific path.
///
/// If the file doesn't exist, returns default configuration.
pub fn load_config_from(path: &Path) -> Result<TenantLinkConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(TenantLinkConfig::default().with_env_overrides());
    }

    let contents = std::fs::read_to_string(path)?;
    let config: TenantLinkConfig =
        toml::from_str(&contents).map_err(|e| AuthError::ConfigRead(e.to_string()))?;

    Ok(config.with_env_overrides())
}

/// Save configuration to the default config file.
pub fn save_config(config: &TenantLinkConfig) -> Result<()> {
    let path = config_file()?;
    save_config_to(config, &path)
}

/// Save configuration to a specific path.
pub fn save_config_to(config: &TenantLinkConfig, path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let contents =
        toml::to_string_pretty(config).map_err(|e| AuthError::ConfigWrite(e.to_string()))?;
    std::fs::write(path, contents)?;

    Ok(())
}
