//! Error types and result aliases for tenantlink.
//!
//! The variants fall into three groups:
//! - Security violations (tenant mismatch, tenant validation, decryption) that
//!   always require explicit re-authentication
//! - Interactive authentication failures the user can react to
//! - Transient infrastructure failures (network, storage) that may succeed on retry

use thiserror::Error;

use crate::auth::tokens::TenantSlot;

/// Main error type for tenantlink operations.
///
/// Use [`requires_reauth`](Self::requires_reauth), [`is_retriable`](Self::is_retriable)
/// and [`is_security_violation`](Self::is_security_violation) to pick a handling strategy.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No credential is stored for the slot.
    #[error("Not signed in to the {0} tenant. Run 'tenantlink auth login --slot {0}' to authenticate.")]
    NotAuthenticated(TenantSlot),

    /// The stored access token is past its expiry.
    #[error("Your {0} session has expired. Run 'tenantlink auth login --slot {0}' to re-authenticate.")]
    TokenExpired(TenantSlot),

    /// A stored credential belongs to a different tenant than the one requested.
    #[error("Tenant mismatch for {slot}: expected tenant '{expected}', found '{actual}'. The credential was not used. Run 'tenantlink auth logout --slot {slot}' and sign in again.")]
    TenantMismatch {
        /// Slot the credential was requested for.
        slot: TenantSlot,
        /// Tenant bound to the slot.
        expected: String,
        /// Tenant found on the credential.
        actual: String,
    },

    /// The identity provider issued a credential for the wrong tenant.
    #[error("Tenant validation failed for {slot}: expected tenant '{expected}', provider issued '{actual}'. The credential was discarded.")]
    TenantValidation {
        /// Slot being authenticated.
        slot: TenantSlot,
        /// Tenant bound to the slot.
        expected: String,
        /// Tenant claimed by the issued token.
        actual: String,
    },

    /// A stored credential could not be decrypted (wrong key, corruption, tampering).
    #[error("Stored credential for {0} could not be decrypted. The key may be wrong or the data tampered with. Run 'tenantlink auth logout --slot {0}' then sign in again.")]
    Decryption(TenantSlot),

    /// The encrypted blob failed authentication before a slot was known.
    #[error("Encrypted credential could not be decrypted: {0}")]
    Cipher(String),

    /// The provider rejected the device authorization request.
    #[error("Could not start device sign-in: {0}")]
    DeviceFlowStart(String),

    /// Poll was called for a slot without an outstanding device-code flow.
    #[error("No sign-in is in progress for {0}. Run 'tenantlink auth login --slot {0}' first.")]
    NoActiveFlow(TenantSlot),

    /// OAuth authentication failed on the provider side.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// User declined the authorization request.
    #[error("Authorization was denied. If this was unintentional, run 'tenantlink auth login' to try again.")]
    AccessDenied,

    /// Identity provider is unreachable.
    #[error("Identity provider at '{authority}' is unavailable. Check your network connection or try again later.")]
    ProviderUnavailable {
        /// Authority base URL.
        authority: String,
    },

    /// Request timed out.
    #[error("Request timed out. The identity provider may be slow or unreachable. Try again later.")]
    Timeout,

    /// Network error during HTTP request.
    #[error("Network error: {0}. Check your internet connection.")]
    Network(String),

    /// Credential file could not be read or written.
    #[error("Credential storage error: {0}. Check permissions and free space in the token directory.")]
    Storage(String),

    /// The encryption key is missing or malformed.
    #[error("Invalid token encryption key: {0}. Provide a base64-encoded 32-byte key via TENANTLINK_TOKEN_KEY.")]
    InvalidKey(String),

    /// OS keyring lookup for key material failed.
    #[error("Failed to access the OS keyring: {0}. Ensure your system keyring is unlocked.")]
    Keyring(String),

    /// General configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}. Check file permissions and format.")]
    ConfigRead(String),

    /// Failed to write configuration file.
    #[error("Failed to write configuration file: {0}. Check directory permissions.")]
    ConfigWrite(String),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON or TOML serialization/deserialization failed.
    #[error("Data serialization error: {0}. This may indicate corrupted data.")]
    Serialization(String),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Checks if this error can be resolved by re-authenticating.
    #[must_use]
    pub const fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated(_)
                | Self::TokenExpired(_)
                | Self::TenantMismatch { .. }
                | Self::TenantValidation { .. }
                | Self::Decryption(_)
                | Self::Cipher(_)
                | Self::AccessDenied
        )
    }

    /// Checks if this error is transient and the operation might succeed on retry.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::ProviderUnavailable { .. } | Self::Storage(_)
        )
    }

    /// Integrity or isolation failures. Never retried automatically.
    #[must_use]
    pub const fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::TenantMismatch { .. }
                | Self::TenantValidation { .. }
                | Self::Decryption(_)
                | Self::Cipher(_)
        )
    }
}

/// Result type alias using [`AuthError`].
pub type Result<T> = std::result::Result<T, AuthError>;

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {err}"))
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigRead(format!("TOML parse error: {err}"))
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(err: toml::ser::Error) -> Self {
        Self::ConfigWrite(format!("TOML serialize error: {err}"))
    }
}

impl From<keyring::Error> for AuthError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for AuthError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => Self::Network(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_recovery_command() {
        let not_auth = AuthError::NotAuthenticated(TenantSlot::Source);
        assert!(not_auth
            .to_string()
            .contains("tenantlink auth login --slot source"));

        let expired = AuthError::TokenExpired(TenantSlot::Target);
        assert!(expired
            .to_string()
            .contains("tenantlink auth login --slot target"));

        let decrypt = AuthError::Decryption(TenantSlot::Source);
        assert!(decrypt.to_string().contains("tenantlink auth logout"));
    }

    #[test]
    fn tenant_mismatch_includes_both_tenants() {
        let err = AuthError::TenantMismatch {
            slot: TenantSlot::Target,
            expected: "tenant-b".to_string(),
            actual: "tenant-a".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tenant-a"));
        assert!(msg.contains("tenant-b"));
        assert!(msg.contains("target"));
    }

    #[test]
    fn security_violations_require_reauth_and_are_not_retriable() {
        let violations = [
            AuthError::TenantMismatch {
                slot: TenantSlot::Source,
                expected: "a".to_string(),
                actual: "b".to_string(),
            },
            AuthError::TenantValidation {
                slot: TenantSlot::Source,
                expected: "a".to_string(),
                actual: "b".to_string(),
            },
            AuthError::Decryption(TenantSlot::Target),
        ];

        for err in &violations {
            assert!(err.is_security_violation());
            assert!(err.requires_reauth());
            assert!(!err.is_retriable());
        }
    }

    #[test]
    fn is_retriable_identifies_transient_errors() {
        assert!(AuthError::Timeout.is_retriable());
        assert!(AuthError::Network("reset".to_string()).is_retriable());
        assert!(AuthError::Storage("disk full".to_string()).is_retriable());
        assert!(AuthError::ProviderUnavailable {
            authority: "https://login.microsoftonline.com".to_string()
        }
        .is_retriable());

        assert!(!AuthError::AccessDenied.is_retriable());
        assert!(!AuthError::NotAuthenticated(TenantSlot::Source).is_retriable());
        assert!(!AuthError::Timeout.is_security_violation());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: AuthError = json_err.into();
        assert!(matches!(err, AuthError::Serialization(_)));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AuthError = io_err.into();
        assert!(matches!(err, AuthError::Io(_)));
    }

    #[test]
    fn from_url_parse_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: AuthError = url_err.into();
        assert!(matches!(err, AuthError::InvalidUrl(_)));
    }
}
