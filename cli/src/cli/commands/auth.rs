//! Authentication command handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::device_flow::SLOW_DOWN_STEP;
use crate::auth::{
    open_browser, AuthOrchestrator, PollOutcome, PollStatus, RefreshOutcome, TenantSlot,
};
use crate::config::load_config;
use crate::error::{AuthError, Result};

fn orchestrator() -> Result<AuthOrchestrator> {
    let config = load_config()?;
    AuthOrchestrator::from_config(&config)
}

fn format_expiry(expires_at: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(expires_at)
        .map_or_else(|| expires_at.to_string(), |t| t.to_rfc3339())
}

/// Handle the `tenantlink auth login` command.
pub async fn handle_login(slot: TenantSlot, no_browser: bool) -> Result<()> {
    let orchestrator = orchestrator()?;
    let tenant_id = orchestrator.bindings().tenant_for(slot).to_string();

    println!("Signing in to the {slot} tenant ({tenant_id})...");
    println!();

    // Step 1: Start device flow
    let session = orchestrator.start_device_code_flow(slot, &tenant_id).await?;

    // Step 2: Display instructions
    println!("To authenticate, please visit:");
    println!();
    println!("  {}", session.verification_uri);
    println!();
    println!("And enter code: {}", session.user_code);
    println!();

    // Step 3: Open browser (unless disabled)
    if !no_browser {
        if open_browser(&session) {
            println!("Browser opened automatically.");
        } else {
            println!("Could not open browser. Please visit the URL manually.");
        }
        println!();
    }

    // Step 4: Poll at the provider's interval until resolved
    println!("Waiting for authorization...");
    let mut interval = session.interval;
    loop {
        tokio::time::sleep(interval).await;

        match orchestrator.poll_for_authentication(slot, &tenant_id).await {
            Ok(PollOutcome::Authenticated { expires_at, .. }) => {
                println!();
                println!("Signed in to the {slot} tenant.");
                println!("  Token expires: {}", format_expiry(expires_at));
                return Ok(());
            },
            Ok(PollOutcome::Unresolved {
                status: PollStatus::Pending,
                ..
            }) => {},
            Ok(PollOutcome::Unresolved {
                status: PollStatus::SlowDown,
                ..
            }) => {
                interval += SLOW_DOWN_STEP;
                tracing::debug!(%slot, interval_secs = interval.as_secs(), "Slowing down polling");
            },
            Ok(PollOutcome::Unresolved {
                status: PollStatus::Expired,
                message,
            }) => return Err(AuthError::AuthenticationFailed(message)),
            Err(e) if e.is_retriable() => {
                tracing::warn!(%slot, error = %e, "Poll failed, retrying");
            },
            Err(e) => return Err(e),
        }
    }
}

/// Handle the `tenantlink auth logout` command.
pub async fn handle_logout(slot: Option<TenantSlot>) -> Result<()> {
    let orchestrator = orchestrator()?;

    match slot {
        Some(slot) => {
            orchestrator.sign_out(slot).await?;
            println!("Signed out of the {slot} tenant.");
        },
        None => {
            orchestrator.sign_out_all().await?;
            println!("Signed out of all tenants.");
        },
    }

    Ok(())
}

/// Handle the `tenantlink auth status` command.
pub async fn handle_status(slot: Option<TenantSlot>) -> Result<()> {
    let orchestrator = orchestrator()?;
    let slots = slot.map_or_else(|| TenantSlot::ALL.to_vec(), |s| vec![s]);

    for slot in slots {
        let tenant_id = orchestrator.bindings().tenant_for(slot);
        println!("{slot} ({tenant_id})");

        match orchestrator.get_auth_status(slot).await {
            Ok(status) if status.authenticated => {
                println!("  Signed in");
                if let Some(expires_at) = status.expires_at {
                    println!("  Expires:   {}", format_expiry(expires_at));
                }
            },
            Ok(status) => {
                println!("  Not signed in");
                if let Some(error) = status.error {
                    println!("  Reason:    {error}");
                }
                println!("  Run 'tenantlink auth login --slot {slot}' to authenticate.");
            },
            Err(e) => {
                println!("  Error:     {e}");
            },
        }
        println!();
    }

    Ok(())
}

/// Handle the `tenantlink auth refresh` command.
pub async fn handle_refresh(slot: TenantSlot) -> Result<()> {
    let orchestrator = orchestrator()?;
    let outcome = orchestrator.refresh_token_if_needed(slot).await?;

    println!("{slot}: {}", outcome.message());
    match outcome {
        RefreshOutcome::Refreshed { expires_at, .. } => {
            println!("  Token expires: {}", format_expiry(expires_at));
        },
        RefreshOutcome::Failed { error } => println!("  {error}"),
        _ => {},
    }

    Ok(())
}

/// Handle the `tenantlink auth token` command.
pub async fn handle_token(slot: TenantSlot) -> Result<()> {
    let orchestrator = orchestrator()?;
    let tenant_id = orchestrator.bindings().tenant_for(slot).to_string();

    let credential = orchestrator.get_token_for_tenant(slot, &tenant_id).await?;
    println!("{}", credential.access_token);

    Ok(())
}

/// Handle the `tenantlink watch` command.
pub async fn handle_watch() -> Result<()> {
    let orchestrator = Arc::new(orchestrator()?);

    // Catch up immediately rather than waiting for the first tick
    for (slot, result) in orchestrator.refresh_all().await {
        match result {
            Ok(outcome) => println!("{slot}: {}", outcome.message()),
            Err(e) => println!("{slot}: {e}"),
        }
    }

    orchestrator.start_auto_refresh().await;
    println!();
    println!("Keeping tokens fresh. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;

    orchestrator.stop_auto_refresh().await;
    println!("Stopped.");

    Ok(())
}
