//! Per-slot refresh deduplication.
//!
//! # Invariants
//!
//! - At most one refresh per slot is in flight at any time
//! - A second caller for the same slot does not wait; it observes the
//!   in-progress marker and returns [`RefreshOutcome::InProgress`]
//! - The marker is released on drop, including when the refresh future is
//!   cancelled or panics
//! - Slots never contend with each other

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Serialize, Serializer};

use crate::auth::tokens::TenantSlot;

/// In-progress flags, one per slot.
#[derive(Debug, Default)]
pub struct RefreshFlags {
    source: AtomicBool,
    target: AtomicBool,
}

impl RefreshFlags {
    const fn flag(&self, slot: TenantSlot) -> &AtomicBool {
        match slot {
            TenantSlot::Source => &self.source,
            TenantSlot::Target => &self.target,
        }
    }

    /// Claims the slot. Returns `None` if a refresh is already running.
    pub fn try_acquire(&self, slot: TenantSlot) -> Option<RefreshGuard<'_>> {
        self.flag(slot)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard { flags: self, slot })
    }
}

/// RAII marker for an in-flight refresh.
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    flags: &'a RefreshFlags,
    slot: TenantSlot,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flags.flag(self.slot).store(false, Ordering::Release);
    }
}

/// Result of `refresh_token_if_needed`.
///
/// Only security violations are raised as errors; everything here is an
/// ordinary outcome so the unattended timer never fails.
///
/// Serializes as `{refreshed, accessToken?, expiresAt?, message?, error?}`,
/// with `error` carrying the caller-facing text and `detail` the cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new credential was validated and stored.
    Refreshed { access_token: String, expires_at: i64 },
    /// Outside the refresh window; nothing to do.
    StillValid,
    /// Another refresh for the slot is running.
    InProgress,
    /// Nothing stored for the slot.
    NoToken,
    /// Provider, network or storage failure.
    Failed { error: String },
}

impl RefreshOutcome {
    /// `true` only when a new credential was stored.
    #[must_use]
    pub const fn is_refreshed(&self) -> bool {
        matches!(self, Self::Refreshed { .. })
    }

    /// Short caller-facing description.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Refreshed { .. } => "Token refreshed",
            Self::StillValid => "Token still valid",
            Self::InProgress => "Refresh already in progress",
            Self::NoToken => "No token found",
            Self::Failed { .. } => "Token refresh failed",
        }
    }

    /// `true` for the outcomes that should be reported as errors.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::NoToken | Self::Failed { .. })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshReply<'a> {
    refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

impl Serialize for RefreshOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut reply = RefreshReply {
            refreshed: self.is_refreshed(),
            access_token: None,
            expires_at: None,
            message: None,
            error: None,
            detail: None,
        };

        match self {
            Self::Refreshed {
                access_token,
                expires_at,
            } => {
                reply.access_token = Some(access_token.as_str());
                reply.expires_at = Some(*expires_at);
            },
            Self::StillValid | Self::InProgress => reply.message = Some(self.message()),
            Self::NoToken => reply.error = Some(self.message()),
            Self::Failed { error } => {
                reply.error = Some(self.message());
                reply.detail = Some(error.as_str());
            },
        }

        reply.serialize(serializer)
    }
}
