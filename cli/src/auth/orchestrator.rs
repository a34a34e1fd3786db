//! Dual-tenant authentication orchestrator.
//!
//! Drives the device-code protocol for the `source` and `target` slots,
//! validates the tenant of every credential before it is stored or handed
//! out, and keeps stored credentials fresh with a background timer.
//!
//! # Flow per slot
//!
//! ```text
//! IDLE --start--> AWAITING_USER --poll: pending--> AWAITING_USER
//!                              --poll: success--> stored (terminal)
//!                              --poll: expired--> expired (terminal)
//!                              --poll: rejected--> error (terminal)
//! ```
//!
//! Starting a new flow for a slot supersedes any unresolved one.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::auth::credentials::{CredentialStore, FileCredentialStore};
use crate::auth::device_flow::{DeviceCodeGrant, DeviceCodeSession, DevicePoll, PollOutcome};
use crate::auth::encryption::TokenCipher;
use crate::auth::providers::{EntraProvider, IdentityProvider};
use crate::auth::refresh::{RefreshFlags, RefreshOutcome};
use crate::auth::tokens::{now_millis, AuthStatus, Credential, TenantSlot};
use crate::config::{AuthConfig, TenantLinkConfig};
use crate::error::{AuthError, Result};

/// Default auto-refresh period, shorter than the five minute refresh window.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Tenant IDs bound to each slot at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantBindings {
    source: String,
    target: String,
}

impl TenantBindings {
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.source_tenant_id, &config.target_tenant_id)
    }

    /// Tenant bound to `slot`.
    #[must_use]
    pub fn tenant_for(&self, slot: TenantSlot) -> &str {
        match slot {
            TenantSlot::Source => &self.source,
            TenantSlot::Target => &self.target,
        }
    }
}

/// An outstanding device-code flow. Lives only in memory.
#[derive(Debug, Clone)]
struct PendingFlow {
    request_id: String,
    grant: DeviceCodeGrant,
    expires_at: i64,
}

/// Handle to the running auto-refresh loop.
struct RefreshTimer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Orchestrates device-code sign-in, refresh and sign-out for both slots.
pub struct AuthOrchestrator {
    bindings: TenantBindings,
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn CredentialStore>,
    flows: Mutex<HashMap<TenantSlot, PendingFlow>>,
    refreshing: RefreshFlags,
    /// Bumped on every sign-out. A write is only allowed if the epoch seen
    /// when the credential was read is still current.
    sign_out_epochs: HashMap<TenantSlot, Mutex<u64>>,
    refresh_interval: Duration,
    timer: Mutex<Option<RefreshTimer>>,
}

impl AuthOrchestrator {
    /// Create an orchestrator over an explicit provider and store.
    #[must_use]
    pub fn new(
        bindings: TenantBindings,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            bindings,
            provider,
            store,
            flows: Mutex::new(HashMap::new()),
            refreshing: RefreshFlags::default(),
            sign_out_epochs: TenantSlot::ALL
                .into_iter()
                .map(|slot| (slot, Mutex::new(0)))
                .collect(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            timer: Mutex::new(None),
        }
    }

    /// Override the auto-refresh period.
    #[must_use]
    pub const fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Wire up the Entra provider, the encrypted file store and the key from
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete, the key is missing
    /// or malformed, or the HTTP client cannot be built.
    pub fn from_config(config: &TenantLinkConfig) -> Result<Self> {
        config.validate()?;

        let cipher = TokenCipher::from_environment()?;
        let store = match &config.storage.dir {
            Some(dir) => FileCredentialStore::with_dir(dir.clone(), cipher),
            None => FileCredentialStore::new(cipher)?,
        };
        let provider = EntraProvider::new(&config.auth)?;

        Ok(Self::new(
            TenantBindings::from_config(&config.auth),
            Arc::new(provider),
            Arc::new(store),
        )
        .with_refresh_interval(config.refresh.interval()))
    }

    /// Tenant bindings in use.
    #[must_use]
    pub const fn bindings(&self) -> &TenantBindings {
        &self.bindings
    }

    /// Start a device-code flow for `slot`.
    ///
    /// Returns as soon as the provider hands out the user code; completing
    /// sign-in is driven by [`poll_for_authentication`](Self::poll_for_authentication).
    ///
    /// # Errors
    ///
    /// - [`AuthError::DeviceFlowStart`] for an empty tenant or a provider rejection
    /// - [`AuthError::TenantMismatch`] if `tenant_id` is not the slot's bound tenant
    pub async fn start_device_code_flow(
        &self,
        slot: TenantSlot,
        tenant_id: &str,
    ) -> Result<DeviceCodeSession> {
        if tenant_id.trim().is_empty() {
            return Err(AuthError::DeviceFlowStart(
                "tenant ID must not be empty".to_string(),
            ));
        }
        self.ensure_bound(slot, tenant_id)?;

        let grant = self.provider.start_device_code(tenant_id).await?;

        let request_id = Uuid::new_v4().to_string();
        let expires_in_ms = i64::try_from(grant.expires_in.as_millis()).unwrap_or(i64::MAX);
        let session = DeviceCodeSession {
            user_code: grant.user_code.clone(),
            verification_uri: grant.verification_uri.clone(),
            verification_uri_complete: grant.verification_uri_complete.clone(),
            expires_in: grant.expires_in.as_secs(),
            message: grant.message.clone(),
            request_id: request_id.clone(),
            interval: grant.interval,
        };

        let flow = PendingFlow {
            request_id: request_id.clone(),
            expires_at: now_millis().saturating_add(expires_in_ms),
            grant,
        };
        if let Some(previous) = self.flows.lock().await.insert(slot, flow) {
            tracing::debug!(%slot, superseded = %previous.request_id, "Superseded unresolved sign-in");
        }

        tracing::info!(%slot, tenant_id, %request_id, "Device sign-in started");
        Ok(session)
    }

    /// Make one attempt to complete the outstanding flow for `slot`.
    ///
    /// Pending and expired are ordinary outcomes. On success the credential's
    /// tenant is checked against `tenant_id` before anything is stored.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoActiveFlow`] if no flow was started for `slot`
    /// - [`AuthError::TenantMismatch`] if `tenant_id` differs from the flow's tenant
    /// - [`AuthError::TenantValidation`] if the provider issued a token for another
    ///   tenant; the credential is discarded
    /// - [`AuthError::AccessDenied`] / [`AuthError::AuthenticationFailed`] for provider rejections
    pub async fn poll_for_authentication(
        &self,
        slot: TenantSlot,
        tenant_id: &str,
    ) -> Result<PollOutcome> {
        let epoch = self.current_epoch(slot).await;
        let flow = self
            .flows
            .lock()
            .await
            .get(&slot)
            .cloned()
            .ok_or(AuthError::NoActiveFlow(slot))?;

        if flow.grant.tenant_id != tenant_id {
            return Err(AuthError::TenantMismatch {
                slot,
                expected: flow.grant.tenant_id.clone(),
                actual: tenant_id.to_string(),
            });
        }

        if now_millis() >= flow.expires_at {
            self.finish_flow(slot, &flow.request_id).await;
            tracing::info!(%slot, "Device code expired before sign-in completed");
            return Ok(PollOutcome::expired());
        }

        match self.provider.poll_device_code(&flow.grant).await? {
            DevicePoll::Pending => {
                tracing::debug!(%slot, "Sign-in still pending");
                Ok(PollOutcome::pending())
            },
            DevicePoll::SlowDown => {
                tracing::debug!(%slot, "Provider asked to slow down");
                Ok(PollOutcome::slow_down())
            },
            DevicePoll::Expired => {
                self.finish_flow(slot, &flow.request_id).await;
                tracing::info!(%slot, "Device code expired");
                Ok(PollOutcome::expired())
            },
            DevicePoll::Rejected { error, description } => {
                self.finish_flow(slot, &flow.request_id).await;
                tracing::warn!(%slot, %error, "Provider rejected sign-in");
                Err(match error.as_str() {
                    "access_denied" | "authorization_declined" => AuthError::AccessDenied,
                    _ => AuthError::AuthenticationFailed(
                        description.map_or_else(|| error.clone(), |d| format!("{error}: {d}")),
                    ),
                })
            },
            DevicePoll::Authorized(credential) => {
                self.finish_flow(slot, &flow.request_id).await;
                self.validate_issued(slot, tenant_id, &credential)?;

                let epoch_guard = self.sign_out_epochs[&slot].lock().await;
                if *epoch_guard != epoch {
                    tracing::info!(%slot, "Signed out while sign-in was completing, discarding credential");
                    return Err(AuthError::NoActiveFlow(slot));
                }
                self.store.store(slot, &credential).await?;
                drop(epoch_guard);
                tracing::info!(%slot, tenant_id, expires_at = credential.expires_at, "Signed in");

                Ok(PollOutcome::Authenticated {
                    access_token: credential.access_token,
                    expires_at: credential.expires_at,
                })
            },
        }
    }

    /// Refresh the slot's credential if it is inside the refresh window.
    ///
    /// Concurrent calls for the same slot are deduplicated: only the first
    /// talks to the provider and writes; the rest get [`RefreshOutcome::InProgress`].
    ///
    /// # Errors
    ///
    /// Only security violations are errors: an undecryptable record, a stored
    /// credential for the wrong tenant, or a refreshed credential issued by the
    /// wrong tenant. Provider, network and storage failures come back as
    /// [`RefreshOutcome::Failed`].
    pub async fn refresh_token_if_needed(&self, slot: TenantSlot) -> Result<RefreshOutcome> {
        let Some(_guard) = self.refreshing.try_acquire(slot) else {
            tracing::debug!(%slot, "Refresh already in progress");
            return Ok(RefreshOutcome::InProgress);
        };

        let epoch = self.current_epoch(slot).await;
        let current = match self.store.load(slot).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return Ok(RefreshOutcome::NoToken),
            Err(e) if e.is_security_violation() => return Err(e),
            Err(e) => {
                tracing::warn!(%slot, error = %e, "Could not load credential for refresh");
                return Ok(RefreshOutcome::Failed {
                    error: e.to_string(),
                });
            },
        };

        let expected = self.bindings.tenant_for(slot);
        self.ensure_stored_tenant(slot, &current)?;

        if !current.needs_refresh() {
            return Ok(RefreshOutcome::StillValid);
        }

        let refreshed = match self.provider.refresh(expected, &current.refresh_token).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(%slot, error = %e, "Token refresh failed");
                return Ok(RefreshOutcome::Failed {
                    error: e.to_string(),
                });
            },
        };

        self.validate_issued(slot, expected, &refreshed)?;

        let epoch_guard = self.sign_out_epochs[&slot].lock().await;
        if *epoch_guard != epoch {
            tracing::info!(%slot, "Signed out during refresh, discarding refreshed credential");
            return Ok(RefreshOutcome::NoToken);
        }
        if let Err(e) = self.store.store(slot, &refreshed).await {
            tracing::warn!(%slot, error = %e, "Could not store refreshed credential");
            return Ok(RefreshOutcome::Failed {
                error: e.to_string(),
            });
        }

        tracing::info!(%slot, expires_at = refreshed.expires_at, "Token refreshed");
        Ok(RefreshOutcome::Refreshed {
            access_token: refreshed.access_token,
            expires_at: refreshed.expires_at,
        })
    }

    /// Refresh both slots concurrently. One slot's failure never blocks the other.
    pub async fn refresh_all(&self) -> [(TenantSlot, Result<RefreshOutcome>); 2] {
        let (source, target) = tokio::join!(
            self.refresh_token_if_needed(TenantSlot::Source),
            self.refresh_token_if_needed(TenantSlot::Target),
        );
        [(TenantSlot::Source, source), (TenantSlot::Target, target)]
    }

    /// Start the background refresh timer.
    ///
    /// Returns `false` if it was already running; no second timer is created.
    pub async fn start_auto_refresh(self: &Arc<Self>) -> bool {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_refresh_loop(
            Arc::downgrade(self),
            self.refresh_interval,
            shutdown_rx,
        ));
        *timer = Some(RefreshTimer { shutdown, task });

        tracing::info!(interval_secs = self.refresh_interval.as_secs(), "Auto-refresh started");
        true
    }

    /// Stop the background refresh timer. Safe to call when not running.
    ///
    /// Takes effect before the next tick. A refresh already in flight is not
    /// interrupted; this returns once it has finished and the loop has exited.
    pub async fn stop_auto_refresh(&self) -> bool {
        let Some(timer) = self.timer.lock().await.take() else {
            return false;
        };
        let _ = timer.shutdown.send(true);
        if let Err(e) = timer.task.await {
            tracing::warn!(error = %e, "Auto-refresh loop ended abnormally");
        }
        tracing::info!("Auto-refresh stopped");
        true
    }

    /// Whether the background refresh timer is running.
    pub async fn is_auto_refresh_running(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    /// Remove the stored credential and any pending sign-in for `slot`.
    ///
    /// A refresh or sign-in already in flight for the slot will not write
    /// its result afterwards.
    pub async fn sign_out(&self, slot: TenantSlot) -> Result<()> {
        let mut epoch = self.sign_out_epochs[&slot].lock().await;
        *epoch += 1;
        self.flows.lock().await.remove(&slot);
        self.store.clear(slot).await?;
        drop(epoch);

        tracing::info!(%slot, "Signed out");
        Ok(())
    }

    /// Stop the refresh timer, then sign out of both slots.
    pub async fn sign_out_all(&self) -> Result<()> {
        self.stop_auto_refresh().await;
        for slot in TenantSlot::ALL {
            self.sign_out(slot).await?;
        }
        tracing::info!("Signed out of all tenants");
        Ok(())
    }

    /// Derived authentication state for `slot`.
    ///
    /// # Errors
    ///
    /// A record that fails decryption or belongs to the wrong tenant is an
    /// error, not "signed out".
    pub async fn get_auth_status(&self, slot: TenantSlot) -> Result<AuthStatus> {
        let Some(credential) = self.store.load(slot).await? else {
            return Ok(AuthStatus::signed_out());
        };
        self.ensure_stored_tenant(slot, &credential)?;
        Ok(AuthStatus::from_credential(&credential, now_millis()))
    }

    /// Load the slot's credential, refusing to return one for another tenant.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TenantMismatch`] if the stored credential or the slot's
    ///   binding does not match `expected_tenant_id`
    /// - [`AuthError::NotAuthenticated`] if nothing is stored
    /// - [`AuthError::TokenExpired`] if the access token is past expiry
    pub async fn get_token_for_tenant(
        &self,
        slot: TenantSlot,
        expected_tenant_id: &str,
    ) -> Result<Credential> {
        self.ensure_bound(slot, expected_tenant_id)?;

        let credential = self
            .store
            .load(slot)
            .await?
            .ok_or(AuthError::NotAuthenticated(slot))?;

        if !credential.tenant_matches(expected_tenant_id) {
            tracing::error!(
                %slot,
                expected = expected_tenant_id,
                actual = %credential.tenant_id,
                "Stored credential belongs to another tenant"
            );
            return Err(AuthError::TenantMismatch {
                slot,
                expected: expected_tenant_id.to_string(),
                actual: credential.tenant_id,
            });
        }

        if credential.is_expired() {
            return Err(AuthError::TokenExpired(slot));
        }

        Ok(credential)
    }

    async fn current_epoch(&self, slot: TenantSlot) -> u64 {
        *self.sign_out_epochs[&slot].lock().await
    }

    fn ensure_bound(&self, slot: TenantSlot, tenant_id: &str) -> Result<()> {
        let expected = self.bindings.tenant_for(slot);
        if expected == tenant_id {
            return Ok(());
        }
        Err(AuthError::TenantMismatch {
            slot,
            expected: expected.to_string(),
            actual: tenant_id.to_string(),
        })
    }

    fn ensure_stored_tenant(&self, slot: TenantSlot, credential: &Credential) -> Result<()> {
        let expected = self.bindings.tenant_for(slot);
        if credential.tenant_matches(expected) {
            return Ok(());
        }
        tracing::error!(
            %slot,
            expected,
            actual = %credential.tenant_id,
            "Stored credential belongs to another tenant"
        );
        Err(AuthError::TenantMismatch {
            slot,
            expected: expected.to_string(),
            actual: credential.tenant_id.clone(),
        })
    }

    /// Gate for every credential the provider issues. Failing here means the
    /// credential is dropped without being stored.
    fn validate_issued(&self, slot: TenantSlot, expected: &str, credential: &Credential) -> Result<()> {
        if credential.tenant_matches(expected) {
            return Ok(());
        }
        tracing::error!(
            %slot,
            expected,
            actual = %credential.tenant_id,
            "Provider issued a credential for the wrong tenant, discarding it"
        );
        Err(AuthError::TenantValidation {
            slot,
            expected: expected.to_string(),
            actual: credential.tenant_id.clone(),
        })
    }

    /// Drop the slot's flow unless a newer one has replaced it meanwhile.
    async fn finish_flow(&self, slot: TenantSlot, request_id: &str) {
        let mut flows = self.flows.lock().await;
        if flows
            .get(&slot)
            .is_some_and(|flow| flow.request_id == request_id)
        {
            flows.remove(&slot);
        }
    }
}

async fn run_refresh_loop(
    orchestrator: Weak<AuthOrchestrator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };

        for (slot, result) in orchestrator.refresh_all().await {
            match result {
                Ok(outcome) if outcome.is_error() => {
                    tracing::debug!(%slot, outcome = outcome.message(), "Auto-refresh skipped");
                },
                Ok(outcome) => {
                    tracing::debug!(%slot, outcome = outcome.message(), "Auto-refresh tick");
                },
                Err(e) => {
                    tracing::error!(%slot, error = %e, "Auto-refresh hit a security violation");
                },
            }
        }
    }

    tracing::debug!("Auto-refresh loop exited");
}
