//! OAuth device authorization flow types (RFC 8628).
//!
//! The provider hands back a [`DeviceCodeGrant`] when a flow starts and a
//! [`DevicePoll`] for every single poll attempt. The orchestrator turns those
//! into the caller-facing [`DeviceCodeSession`] and [`PollOutcome`].

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::auth::tokens::Credential;

/// Provider response to a device authorization request.
#[derive(Clone)]
pub struct DeviceCodeGrant {
    /// Tenant the flow was started against.
    pub tenant_id: String,
    /// Secret code the application polls with.
    pub device_code: String,
    /// Code for the user to enter.
    pub user_code: String,
    /// URL for the user to visit.
    pub verification_uri: String,
    /// Complete URL with code (if available).
    pub verification_uri_complete: Option<String>,
    /// How long until the code expires.
    pub expires_in: Duration,
    /// Minimum delay between polls.
    pub interval: Duration,
    /// Provider-supplied instructions for the user.
    pub message: String,
}

impl std::fmt::Debug for DeviceCodeGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeGrant")
            .field("tenant_id", &self.tenant_id)
            .field("device_code", &"<redacted>")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Outcome of exactly one poll against the token endpoint.
#[derive(Debug, Clone)]
pub enum DevicePoll {
    /// User completed sign-in; the provider issued a credential.
    Authorized(Credential),
    /// `authorization_pending`: the user has not finished yet.
    Pending,
    /// `slow_down`: keep polling, but less often.
    SlowDown,
    /// `expired_token`: the device code lifetime is over.
    Expired,
    /// Any other provider error (denied, bad client, ...).
    Rejected {
        error: String,
        description: Option<String>,
    },
}

impl DevicePoll {
    /// Classify a token-endpoint error code.
    #[must_use]
    pub fn from_error_code(error: &str, description: Option<String>) -> Self {
        match error {
            "authorization_pending" => Self::Pending,
            "slow_down" => Self::SlowDown,
            "expired_token" | "code_expired" => Self::Expired,
            _ => Self::Rejected {
                error: error.to_string(),
                description,
            },
        }
    }
}

/// Caller-facing view of a started device-code flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCodeSession {
    pub user_code: String,
    pub verification_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Seconds until the code expires.
    pub expires_in: u64,
    pub message: String,
    /// Correlates this start with later polls.
    pub request_id: String,
    /// Suggested seconds between polls.
    #[serde(skip)]
    pub interval: Duration,
}

/// Status of an unresolved poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Pending,
    /// Still pending, and the provider asked for a longer poll interval.
    SlowDown,
    Expired,
}

impl PollStatus {
    /// `true` while the flow can still succeed.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending | Self::SlowDown)
    }
}

/// Extra delay to add to the poll interval after each `slow_down`.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Caller-facing result of `poll_for_authentication`.
///
/// Serializes as `{success: true, accessToken, expiresAt}` or
/// `{success: false, status, message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Credential validated and stored.
    Authenticated { access_token: String, expires_at: i64 },
    /// Not resolved yet, or resolved as expired.
    Unresolved { status: PollStatus, message: String },
}

impl PollOutcome {
    pub(crate) fn pending() -> Self {
        Self::Unresolved {
            status: PollStatus::Pending,
            message: "Waiting for the user to complete sign-in".to_string(),
        }
    }

    pub(crate) fn slow_down() -> Self {
        Self::Unresolved {
            status: PollStatus::SlowDown,
            message: "Waiting for the user to complete sign-in, polling less often".to_string(),
        }
    }

    pub(crate) fn expired() -> Self {
        Self::Unresolved {
            status: PollStatus::Expired,
            message: "Device code expired, please start sign-in again".to_string(),
        }
    }

    /// `true` once a credential has been stored.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PollReply<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<PollStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl Serialize for PollOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let reply = match self {
            Self::Authenticated {
                access_token,
                expires_at,
            } => PollReply {
                success: true,
                access_token: Some(access_token.as_str()),
                expires_at: Some(*expires_at),
                status: None,
                message: None,
            },
            Self::Unresolved { status, message } => PollReply {
                success: false,
                access_token: None,
                expires_at: None,
                status: Some(*status),
                message: Some(message.as_str()),
            },
        };
        reply.serialize(serializer)
    }
}

/// Open the verification URL in the default browser.
///
/// # Returns
///
/// Returns `true` if the browser was opened successfully, `false` otherwise.
pub fn open_browser(session: &DeviceCodeSession) -> bool {
    let url = session
        .verification_uri_complete
        .as_ref()
        .unwrap_or(&session.verification_uri);

    open::that(url).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_provider_error_codes() {
        assert!(matches!(
            DevicePoll::from_error_code("authorization_pending", None),
            DevicePoll::Pending
        ));
        assert!(matches!(
            DevicePoll::from_error_code("slow_down", None),
            DevicePoll::SlowDown
        ));
        assert!(matches!(
            DevicePoll::from_error_code("expired_token", None),
            DevicePoll::Expired
        ));

        match DevicePoll::from_error_code("access_denied", Some("user said no".to_string())) {
            DevicePoll::Rejected { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("user said no"));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn grant_debug_hides_device_code() {
        let grant = DeviceCodeGrant {
            tenant_id: "tenant-a".to_string(),
            device_code: "super-secret".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://microsoft.com/devicelogin".to_string(),
            verification_uri_complete: None,
            expires_in: Duration::from_secs(900),
            interval: Duration::from_secs(5),
            message: String::new(),
        };
        let rendered = format!("{grant:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("ABCD-EFGH"));
    }

    #[test]
    fn session_serializes_for_callers() {
        let session = DeviceCodeSession {
            user_code: "ABCD".to_string(),
            verification_uri: "https://example.test/device".to_string(),
            verification_uri_complete: None,
            expires_in: 900,
            message: "Enter ABCD".to_string(),
            request_id: "req-1".to_string(),
            interval: Duration::from_secs(5),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["userCode"], "ABCD");
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["expiresIn"], 900);
        assert!(json.get("interval").is_none());
    }

    #[test]
    fn poll_outcome_serializes_for_callers() {
        let json = serde_json::to_value(PollOutcome::Authenticated {
            access_token: "t".to_string(),
            expires_at: 7,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "accessToken": "t", "expiresAt": 7})
        );

        let json = serde_json::to_value(PollOutcome::slow_down()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["status"], "slow_down");

        let json = serde_json::to_value(PollOutcome::expired()).unwrap();
        assert_eq!(json["status"], "expired");
        assert!(json.get("accessToken").is_none());
    }

    #[test]
    fn slow_down_is_still_pending() {
        assert!(PollStatus::SlowDown.is_pending());
        assert!(PollStatus::Pending.is_pending());
        assert!(!PollStatus::Expired.is_pending());
    }

    #[test]
    fn poll_outcome_helpers() {
        assert!(!PollOutcome::pending().is_success());
        assert_eq!(
            PollOutcome::expired(),
            PollOutcome::Unresolved {
                status: PollStatus::Expired,
                message: "Device code expired, please start sign-in again".to_string(),
            }
        );
        assert!(PollOutcome::Authenticated {
            access_token: "t".to_string(),
            expires_at: 1
        }
        .is_success());
    }
}
