//! tenantlink - dual-tenant device-code authentication.
//!
//! Signs you into a source and a target tenant, keeps both credentials
//! encrypted on disk and refreshes them before they expire.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tenantlink::cli::{self, AuthCommands, Cli, Commands, ConfigCommands};
use tenantlink::config::settings::env;
use tenantlink::Result;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(env::LOG_LEVEL).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Run the command
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Login { slot, no_browser } => {
                cli::commands::handle_login(slot.into(), no_browser).await
            },
            AuthCommands::Logout { slot, all: _ } => {
                cli::commands::handle_logout(slot.map(Into::into)).await
            },
            AuthCommands::Status { slot } => {
                cli::commands::handle_status(slot.map(Into::into)).await
            },
            AuthCommands::Refresh { slot } => cli::commands::handle_refresh(slot.into()).await,
            AuthCommands::Token { slot } => cli::commands::handle_token(slot.into()).await,
        },
        Commands::Watch => cli::commands::handle_watch().await,
        Commands::Config { command } => match command {
            ConfigCommands::Init {
                client_id,
                source_tenant,
                target_tenant,
                force,
            } => cli::commands::handle_config_init(client_id, source_tenant, target_tenant, force),
            ConfigCommands::Show => cli::commands::handle_config_show(),
        },
        Commands::Completions { shell } => cli::commands::handle_completions(shell),
    }
}
