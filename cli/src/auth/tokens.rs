//! Token types for authentication.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// How long before expiry a credential is proactively renewed.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

const REFRESH_WINDOW_MS: i64 = 5 * 60 * 1000;

/// The two logical tenant roles. Each slot keeps its own credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantSlot {
    Source,
    Target,
}

impl TenantSlot {
    /// Both slots, in a fixed order.
    pub const ALL: [Self; 2] = [Self::Source, Self::Target];

    /// Lowercase name, also used as the storage file stem.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }
}

impl std::fmt::Display for TenantSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TenantSlot {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "source" => Ok(Self::Source),
            "target" => Ok(Self::Target),
            _ => Err(format!("Unknown tenant slot: {s}")),
        }
    }
}

/// A stored authentication credential, bound to one tenant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Bearer token for the resource API.
    pub access_token: String,
    /// Token used to obtain a new access token.
    pub refresh_token: String,
    /// Epoch milliseconds after which `access_token` must not be used.
    pub expires_at: i64,
    /// Tenant that issued this credential.
    pub tenant_id: String,
}

// Tokens stay out of logs and panic messages.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl Credential {
    /// `now >= expires_at`.
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// `now >= expires_at - REFRESH_WINDOW`.
    #[must_use]
    pub fn needs_refresh_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at.saturating_sub(REFRESH_WINDOW_MS)
    }

    /// Check if the access token is expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Check if the access token is expired or will expire within the refresh window.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(now_millis())
    }

    /// Strict tenant equality. An empty tenant never matches.
    #[must_use]
    pub fn tenant_matches(&self, expected_tenant_id: &str) -> bool {
        !expected_tenant_id.is_empty() && self.tenant_id == expected_tenant_id
    }
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Derived authentication state for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthStatus {
    /// No credential stored.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            authenticated: false,
            tenant_id: None,
            expires_at: None,
            error: None,
        }
    }

    /// Derive the status of a credential at `now_ms`.
    #[must_use]
    pub fn from_credential(credential: &Credential, now_ms: i64) -> Self {
        if credential.is_expired_at(now_ms) {
            return Self {
                error: Some("Token expired".to_string()),
                ..Self::signed_out()
            };
        }

        Self {
            authenticated: true,
            tenant_id: Some(credential.tenant_id.clone()),
            expires_at: Some(credential.expires_at),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_at: i64) -> Credential {
        Credential {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at,
            tenant_id: "tenant-a".to_string(),
        }
    }

    #[test]
    fn slot_parses_case_insensitively() {
        assert_eq!(TenantSlot::try_from("Source"), Ok(TenantSlot::Source));
        assert_eq!(TenantSlot::try_from("TARGET"), Ok(TenantSlot::Target));
        assert!(TenantSlot::try_from("other").is_err());
    }

    #[test]
    fn is_expired_boundary() {
        let c = credential(1_000_000);
        assert!(!c.is_expired_at(999_999));
        assert!(c.is_expired_at(1_000_000));
        assert!(c.is_expired_at(1_000_001));
    }

    #[test]
    fn needs_refresh_boundary() {
        let window = i64::try_from(REFRESH_WINDOW.as_millis()).unwrap();
        let c = credential(10_000_000);
        assert!(!c.needs_refresh_at(10_000_000 - window - 1));
        assert!(c.needs_refresh_at(10_000_000 - window));
        assert!(c.needs_refresh_at(10_000_000));
    }

    #[test]
    fn wall_clock_predicates() {
        let now = now_millis();
        let soon = credential(now + chrono::Duration::minutes(4).num_milliseconds());
        assert!(soon.needs_refresh());
        assert!(!soon.is_expired());

        let later = credential(now + chrono::Duration::hours(1).num_milliseconds());
        assert!(!later.needs_refresh());
    }

    #[test]
    fn tenant_matches_is_strict() {
        let c = credential(0);
        assert!(c.tenant_matches("tenant-a"));
        assert!(!c.tenant_matches("tenant-b"));
        assert!(!c.tenant_matches("TENANT-A"));
        assert!(!c.tenant_matches(""));

        let anonymous = Credential {
            tenant_id: String::new(),
            ..credential(0)
        };
        assert!(!anonymous.tenant_matches(""));
    }

    #[test]
    fn credential_serializes_camel_case() {
        let json = serde_json::to_value(credential(42)).unwrap();
        assert_eq!(json["accessToken"], "at");
        assert_eq!(json["refreshToken"], "rt");
        assert_eq!(json["expiresAt"], 42);
        assert_eq!(json["tenantId"], "tenant-a");
    }

    #[test]
    fn debug_redacts_tokens() {
        let rendered = format!("{:?}", credential(0));
        assert!(!rendered.contains("\"at\""));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("tenant-a"));
    }

    #[test]
    fn status_for_expired_and_valid_credentials() {
        let c = credential(5_000);

        let expired = AuthStatus::from_credential(&c, 5_000);
        assert!(!expired.authenticated);
        assert_eq!(expired.error.as_deref(), Some("Token expired"));

        let valid = AuthStatus::from_credential(&c, 4_999);
        assert!(valid.authenticated);
        assert_eq!(valid.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(valid.expires_at, Some(5_000));
    }
}
