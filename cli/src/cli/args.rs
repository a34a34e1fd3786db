//! Command-line argument parsing.

use clap::{Parser, Subcommand, ValueEnum};

use crate::auth::TenantSlot;

/// Dual-tenant authentication for cross-tenant tooling.
///
/// Signs you into a source and a target tenant side by side, stores both
/// credentials encrypted and keeps them fresh.
#[derive(Parser, Debug)]
#[command(name = "tenantlink")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage tenant sign-in.
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Keep both tenants signed in until interrupted.
    ///
    /// Runs the background refresh timer in the foreground. Stop with Ctrl-C.
    Watch,

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts.
    ///
    /// Outputs completion script for the specified shell.
    /// Follow shell-specific instructions to install.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: ShellType,
    },
}

/// Authentication subcommands.
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Sign in to a tenant with a device code.
    Login {
        /// Which tenant to sign in to.
        #[arg(short, long, value_enum)]
        slot: SlotArg,

        /// Skip opening the browser automatically.
        #[arg(long)]
        no_browser: bool,
    },

    /// Sign out and remove stored credentials.
    Logout {
        /// Only sign out of this tenant.
        #[arg(short, long, value_enum, conflicts_with = "all")]
        slot: Option<SlotArg>,

        /// Sign out of both tenants (the default without --slot).
        #[arg(long)]
        all: bool,
    },

    /// Show authentication status.
    Status {
        /// Only show this tenant.
        #[arg(short, long, value_enum)]
        slot: Option<SlotArg>,
    },

    /// Refresh a tenant's token if it is close to expiry.
    Refresh {
        /// Which tenant to refresh.
        #[arg(short, long, value_enum)]
        slot: SlotArg,
    },

    /// Print a tenant's access token.
    ///
    /// The token is only printed after its tenant has been checked against
    /// the configured binding.
    Token {
        /// Which tenant's token to print.
        #[arg(short, long, value_enum)]
        slot: SlotArg,
    },
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a configuration file with the given tenant bindings.
    Init {
        /// Application (client) ID registered with the identity provider.
        #[arg(long, env = "TENANTLINK_CLIENT_ID")]
        client_id: String,

        /// Tenant ID for the source slot.
        #[arg(long, env = "TENANTLINK_SOURCE_TENANT")]
        source_tenant: String,

        /// Tenant ID for the target slot.
        #[arg(long, env = "TENANTLINK_TARGET_TENANT")]
        target_tenant: String,

        /// Overwrite an existing configuration file.
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration.
    Show,
}

/// Tenant slot argument for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SlotArg {
    Source,
    Target,
}

impl From<SlotArg> for TenantSlot {
    fn from(arg: SlotArg) -> Self {
        match arg {
            SlotArg::Source => Self::Source,
            SlotArg::Target => Self::Target,
        }
    }
}

/// Supported shells for completions.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ShellType {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_login_with_slot() {
        let cli = Cli::try_parse_from(["tenantlink", "auth", "login", "--slot", "target", "--no-browser"])
            .unwrap();
        match cli.command {
            Commands::Auth {
                command: AuthCommands::Login { slot, no_browser },
            } => {
                assert_eq!(TenantSlot::from(slot), TenantSlot::Target);
                assert!(no_browser);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn logout_slot_and_all_conflict() {
        let result =
            Cli::try_parse_from(["tenantlink", "auth", "logout", "--slot", "source", "--all"]);
        assert!(result.is_err());
    }

    #[test]
    fn login_requires_slot() {
        assert!(Cli::try_parse_from(["tenantlink", "auth", "login"]).is_err());
    }
}
