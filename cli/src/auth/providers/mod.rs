//! Identity provider implementations.

pub mod entra;

pub use entra::EntraProvider;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

use crate::auth::device_flow::{DeviceCodeGrant, DevicePoll};
use crate::auth::tokens::Credential;
use crate::error::Result;

/// The three provider operations the orchestrator relies on.
///
/// Implementations must not retry or sleep between poll attempts; each call
/// to [`poll_device_code`](Self::poll_device_code) is one token-endpoint request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Starts a device authorization against `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DeviceFlowStart`](crate::error::AuthError::DeviceFlowStart)
    /// if the provider rejects the request.
    async fn start_device_code(&self, tenant_id: &str) -> Result<DeviceCodeGrant>;

    /// Makes one attempt to redeem the device code.
    ///
    /// Pending, slow-down, expiry and provider rejections come back as
    /// [`DevicePoll`] variants; only transport failures are errors.
    async fn poll_device_code(&self, grant: &DeviceCodeGrant) -> Result<DevicePoll>;

    /// Exchanges a refresh token for a new credential.
    async fn refresh(&self, tenant_id: &str, refresh_token: &str) -> Result<Credential>;
}

#[derive(Deserialize)]
struct TenantClaims {
    tid: Option<String>,
}

/// Reads the `tid` claim from a JWT payload without verifying the signature.
///
/// Returns `None` for opaque tokens or tokens without a tenant claim.
#[must_use]
pub fn tenant_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: TenantClaims = serde_json::from_slice(&bytes).ok()?;
    claims.tid.filter(|tid| !tid.is_empty())
}

/// Tenant IDs end up in endpoint paths, so only GUID/domain characters pass.
pub(crate) fn is_valid_tenant_id(tenant_id: &str) -> bool {
    !tenant_id.is_empty()
        && tenant_id.len() <= 128
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !tenant_id.contains("..")
}

#[cfg(test)]
pub(crate) mod test_support {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    /// Builds an unsigned JWT whose payload carries `tid`.
    pub fn jwt_with_tenant(tenant_id: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"tid":"{tenant_id}","sub":"user"}}"#));
        format!("{header}.{payload}.sig")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::jwt_with_tenant;
    use super::*;

    #[test]
    fn reads_tenant_claim() {
        let token = jwt_with_tenant("72f988bf-86f1-41af-91ab-2d7cd011db47");
        assert_eq!(
            tenant_from_token(&token).as_deref(),
            Some("72f988bf-86f1-41af-91ab-2d7cd011db47")
        );
    }

    #[test]
    fn opaque_or_claimless_tokens_have_no_tenant() {
        assert!(tenant_from_token("opaque-token").is_none());
        assert!(tenant_from_token("a.!!!.c").is_none());

        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user"}"#);
        assert!(tenant_from_token(&format!("h.{payload}.s")).is_none());

        let payload = URL_SAFE_NO_PAD.encode(br#"{"tid":""}"#);
        assert!(tenant_from_token(&format!("h.{payload}.s")).is_none());
    }

    #[test]
    fn tenant_id_path_safety() {
        assert!(is_valid_tenant_id("72f988bf-86f1-41af-91ab-2d7cd011db47"));
        assert!(is_valid_tenant_id("contoso.onmicrosoft.com"));
        assert!(!is_valid_tenant_id(""));
        assert!(!is_valid_tenant_id("../common"));
        assert!(!is_valid_tenant_id("tenant/oauth2"));
        assert!(!is_valid_tenant_id("tenant?x=1"));
    }
}
