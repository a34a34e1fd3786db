//! Microsoft identity platform provider (tenant-scoped v2.0 endpoints).
//!
//! Endpoints for a tenant `T` under authority `A`:
//! - `A/T/oauth2/v2.0/devicecode`
//! - `A/T/oauth2/v2.0/token`

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::devicecode::{DeviceAuthorizationResponse, ExtraDeviceAuthorizationFields};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, ClientId, DeviceAuthorizationUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{is_valid_tenant_id, tenant_from_token, IdentityProvider};
use crate::auth::device_flow::{DeviceCodeGrant, DevicePoll};
use crate::auth::tokens::Credential;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Extra fields Entra adds to the device authorization response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntraDeviceFields {
    /// Human-readable sign-in instructions.
    #[serde(default)]
    pub message: Option<String>,
}

impl ExtraDeviceAuthorizationFields for EntraDeviceFields {}

/// Raw token endpoint body; success and error share one shape.
#[derive(Debug, Deserialize)]
struct TokenEndpointBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Identity provider backed by Microsoft Entra ID.
pub struct EntraProvider {
    client_id: ClientId,
    authority: Url,
    scopes: Vec<Scope>,
    http: ClientWithMiddleware,
}

impl EntraProvider {
    /// Create a provider from the auth configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(format!("tenantlink/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let http = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client_id: ClientId::new(config.client_id.clone()),
            authority: config.authority.clone(),
            scopes: config.scopes.iter().cloned().map(Scope::new).collect(),
            http,
        })
    }

    /// Base URL for a tenant's v2.0 endpoints, ending in `/`.
    fn tenant_base(&self, tenant_id: &str) -> Result<Url> {
        if !is_valid_tenant_id(tenant_id) {
            return Err(AuthError::Config(format!("invalid tenant ID '{tenant_id}'")));
        }

        let mut authority = self.authority.clone();
        if !authority.path().ends_with('/') {
            let path = format!("{}/", authority.path());
            authority.set_path(&path);
        }
        Ok(authority.join(&format!("{tenant_id}/oauth2/v2.0/"))?)
    }

    fn token_url(&self, tenant_id: &str) -> Result<Url> {
        Ok(self.tenant_base(tenant_id)?.join("token")?)
    }

    /// Build an OAuth2 client scoped to one tenant.
    fn build_client(&self, tenant_id: &str) -> Result<BasicClient> {
        let base = self.tenant_base(tenant_id)?;

        Ok(BasicClient::new(
            self.client_id.clone(),
            None, // Public client, no secret for device flow
            AuthUrl::from_url(base.join("authorize")?),
            Some(TokenUrl::from_url(base.join("token")?)),
        )
        .set_device_authorization_url(DeviceAuthorizationUrl::from_url(base.join("devicecode")?)))
    }

    fn authority_unavailable(&self) -> AuthError {
        AuthError::ProviderUnavailable {
            authority: self.authority.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for EntraProvider {
    async fn start_device_code(&self, tenant_id: &str) -> Result<DeviceCodeGrant> {
        let client = self.build_client(tenant_id)?;

        let mut request = client
            .exchange_device_code()
            .map_err(|e| AuthError::DeviceFlowStart(format!("Device flow not supported: {e}")))?;

        for scope in &self.scopes {
            request = request.add_scope(scope.clone());
        }

        let response: DeviceAuthorizationResponse<EntraDeviceFields> = request
            .request_async(async_http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::Request(_) => self.authority_unavailable(),
                other => AuthError::DeviceFlowStart(format!("Device authorization failed: {other}")),
            })?;

        let verification_uri = response.verification_uri().to_string();
        let message = response.extra_fields().message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {verification_uri} and enter the code {}",
                response.user_code().secret()
            )
        });

        tracing::debug!(tenant_id, "Device authorization started");

        Ok(DeviceCodeGrant {
            tenant_id: tenant_id.to_string(),
            device_code: response.device_code().secret().to_string(),
            user_code: response.user_code().secret().to_string(),
            verification_uri,
            verification_uri_complete: response
                .verification_uri_complete()
                .map(|u| u.secret().clone()),
            expires_in: response.expires_in(),
            interval: response.interval(),
            message,
        })
    }

    async fn poll_device_code(&self, grant: &DeviceCodeGrant) -> Result<DevicePoll> {
        let url = self.token_url(&grant.tenant_id)?;

        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
                ("client_id", self.client_id.as_str()),
                ("device_code", grant.device_code.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: TokenEndpointBody = response.json().await.map_err(|e| {
            AuthError::AuthenticationFailed(format!("Unreadable token response ({status}): {e}"))
        })?;

        Ok(classify_token_response(body, Utc::now().timestamp_millis()))
    }

    async fn refresh(&self, tenant_id: &str, refresh_token: &str) -> Result<Credential> {
        let client = self.build_client(tenant_id)?;

        let presented = RefreshToken::new(refresh_token.to_string());
        let mut request = client.exchange_refresh_token(&presented);
        for scope in &self.scopes {
            request = request.add_scope(scope.clone());
        }

        let response = request
            .request_async(async_http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::Request(_) => self.authority_unavailable(),
                other => AuthError::AuthenticationFailed(format!("Token refresh failed: {other}")),
            })?;

        let access_token = response.access_token().secret().to_string();
        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);

        Ok(Credential {
            tenant_id: tenant_from_token(&access_token).unwrap_or_default(),
            refresh_token: response
                .refresh_token()
                .map_or_else(|| refresh_token.to_string(), |t| t.secret().to_string()),
            expires_at: expires_at_from(Utc::now().timestamp_millis(), lifetime),
            access_token,
        })
    }
}

fn expires_at_from(now_ms: i64, lifetime: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX))
}

/// Turns one token endpoint body into a poll outcome.
///
/// The tenant comes from the ID token when present, otherwise from the access
/// token. Without a readable `tid` the tenant stays empty and fails validation.
fn classify_token_response(body: TokenEndpointBody, now_ms: i64) -> DevicePoll {
    if let Some(error) = body.error {
        return DevicePoll::from_error_code(&error, body.error_description);
    }

    let Some(access_token) = body.access_token else {
        return DevicePoll::Rejected {
            error: "invalid_response".to_string(),
            description: Some("token response had neither a token nor an error".to_string()),
        };
    };

    let tenant_id = body
        .id_token
        .as_deref()
        .and_then(tenant_from_token)
        .or_else(|| tenant_from_token(&access_token))
        .unwrap_or_default();

    // Some device-code grants issue a single long-lived token
    let refresh_token = body.refresh_token.unwrap_or_else(|| access_token.clone());
    let lifetime = body
        .expires_in
        .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);

    DevicePoll::Authorized(Credential {
        access_token,
        refresh_token,
        expires_at: expires_at_from(now_ms, lifetime),
        tenant_id,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::jwt_with_tenant;
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TENANT: &str = "tenant-a";

    fn provider_for(server: &MockServer) -> EntraProvider {
        let config = AuthConfig {
            client_id: "client-123".to_string(),
            source_tenant_id: TENANT.to_string(),
            target_tenant_id: "tenant-b".to_string(),
            authority: Url::parse(&server.uri()).unwrap(),
            scopes: vec!["User.Read".to_string(), "offline_access".to_string()],
        };
        EntraProvider::new(&config).unwrap()
    }

    fn grant() -> DeviceCodeGrant {
        DeviceCodeGrant {
            tenant_id: TENANT.to_string(),
            device_code: "device-xyz".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://microsoft.com/devicelogin".to_string(),
            verification_uri_complete: None,
            expires_in: Duration::from_secs(900),
            interval: Duration::from_secs(5),
            message: String::new(),
        }
    }

    fn body(json: serde_json::Value) -> TokenEndpointBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn classify_success_prefers_id_token_tenant() {
        let poll = classify_token_response(
            body(serde_json::json!({
                "access_token": jwt_with_tenant("from-access"),
                "refresh_token": "rt",
                "id_token": jwt_with_tenant("from-id"),
                "expires_in": 60
            })),
            1_000,
        );

        match poll {
            DevicePoll::Authorized(c) => {
                assert_eq!(c.tenant_id, "from-id");
                assert_eq!(c.refresh_token, "rt");
                assert_eq!(c.expires_at, 61_000);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classify_single_token_grant_reuses_access_token() {
        let access = jwt_with_tenant(TENANT);
        let poll = classify_token_response(
            body(serde_json::json!({ "access_token": access })),
            0,
        );

        match poll {
            DevicePoll::Authorized(c) => {
                assert_eq!(c.refresh_token, access);
                assert_eq!(c.tenant_id, TENANT);
                assert_eq!(c.expires_at, 3_600_000);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classify_opaque_token_leaves_tenant_empty() {
        let poll = classify_token_response(
            body(serde_json::json!({ "access_token": "opaque", "expires_in": 10 })),
            0,
        );
        assert!(matches!(poll, DevicePoll::Authorized(c) if c.tenant_id.is_empty()));
    }

    #[test]
    fn classify_error_bodies() {
        assert!(matches!(
            classify_token_response(body(serde_json::json!({"error": "authorization_pending"})), 0),
            DevicePoll::Pending
        ));
        assert!(matches!(
            classify_token_response(body(serde_json::json!({"error": "expired_token"})), 0),
            DevicePoll::Expired
        ));
        assert!(matches!(
            classify_token_response(body(serde_json::json!({})), 0),
            DevicePoll::Rejected { .. }
        ));
    }

    #[test]
    fn tenant_base_handles_authority_paths() {
        let config = AuthConfig {
            authority: Url::parse("https://login.example.test/idp").unwrap(),
            ..AuthConfig::default()
        };
        let provider = EntraProvider::new(&config).unwrap();

        assert_eq!(
            provider.token_url(TENANT).unwrap().as_str(),
            "https://login.example.test/idp/tenant-a/oauth2/v2.0/token"
        );
        assert!(provider.tenant_base("../common").is_err());
    }

    #[tokio::test]
    async fn start_device_code_returns_user_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-a/oauth2/v2.0/devicecode"))
            .and(body_string_contains("client_id=client-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "device-xyz",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": 5,
                "message": "To sign in, use a web browser to open the page https://microsoft.com/devicelogin and enter the code ABCD-EFGH"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = provider_for(&server)
            .start_device_code(TENANT)
            .await
            .unwrap();

        assert_eq!(grant.tenant_id, TENANT);
        assert_eq!(grant.user_code, "ABCD-EFGH");
        assert_eq!(grant.device_code, "device-xyz");
        assert_eq!(grant.expires_in, Duration::from_secs(900));
        assert!(grant.message.contains("ABCD-EFGH"));
    }

    #[tokio::test]
    async fn start_device_code_surfaces_provider_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-a/oauth2/v2.0/devicecode"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS700016: application not found"
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server).start_device_code(TENANT).await;
        assert!(matches!(result, Err(AuthError::DeviceFlowStart(_))));
    }

    #[tokio::test]
    async fn poll_maps_pending_and_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-a/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=device-xyz"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "authorization_pending",
                "error_description": "AADSTS70016: pending"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant-a/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": jwt_with_tenant(TENANT),
                "refresh_token": "refresh-1",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);

        let first = provider.poll_device_code(&grant()).await.unwrap();
        assert!(matches!(first, DevicePoll::Pending));

        let second = provider.poll_device_code(&grant()).await.unwrap();
        match second {
            DevicePoll::Authorized(c) => {
                assert_eq!(c.tenant_id, TENANT);
                assert_eq!(c.refresh_token, "refresh-1");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_exchanges_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-a/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": jwt_with_tenant(TENANT),
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = provider_for(&server)
            .refresh(TENANT, "old-refresh")
            .await
            .unwrap();

        assert_eq!(credential.tenant_id, TENANT);
        // No rotation in the response: the old refresh token is kept
        assert_eq!(credential.refresh_token, "old-refresh");
        assert!(!credential.needs_refresh());
    }

    #[tokio::test]
    async fn refresh_rejection_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-a/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS700082: The refresh token has expired"
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server).refresh(TENANT, "revoked").await;
        assert!(matches!(result, Err(AuthError::AuthenticationFailed(_))));
    }
}
