//! Platform-specific path utilities for tenantlink.

use std::path::PathBuf;

use crate::error::{AuthError, Result};

/// Get the configuration directory for tenantlink.
///
/// - Linux: `~/.config/tenantlink`
/// - macOS: `~/Library/Application Support/tenantlink`
/// - Windows: `%APPDATA%\tenantlink`
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| AuthError::Config("Cannot determine config directory".to_string()))?;
    Ok(base.join("tenantlink"))
}

/// Get the data directory for tenantlink.
///
/// - Linux: `~/.local/share/tenantlink`
/// - macOS: `~/Library/Application Support/tenantlink`
/// - Windows: `%APPDATA%\tenantlink`
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .ok_or_else(|| AuthError::Config("Cannot determine data directory".to_string()))?;
    Ok(base.join("tenantlink"))
}

/// Get the main configuration file path.
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the default directory holding the encrypted slot files.
pub fn tokens_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("tokens"))
}
