//! Configuration and shell integration command handlers.

use crate::cli::ShellType;
use crate::config::{config_file, load_config, save_config_to, TenantLinkConfig};
use crate::error::{AuthError, Result};

/// Handles the `tenantlink config init` command.
pub fn handle_config_init(
    client_id: String,
    source_tenant: String,
    target_tenant: String,
    force: bool,
) -> Result<()> {
    let path = config_file()?;
    if path.exists() && !force {
        return Err(AuthError::Config(format!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        )));
    }

    let mut config = TenantLinkConfig::default();
    config.auth.client_id = client_id;
    config.auth.source_tenant_id = source_tenant;
    config.auth.target_tenant_id = target_tenant;
    config.validate()?;

    save_config_to(&config, &path)?;
    println!("Wrote {}", path.display());
    println!();
    println!("Set TENANTLINK_TOKEN_KEY to a base64-encoded 32-byte key before signing in.");

    Ok(())
}

/// Handles the `tenantlink config show` command.
pub fn handle_config_show() -> Result<()> {
    let path = config_file()?;
    let config = load_config()?;

    println!("# {}", path.display());
    let rendered =
        toml::to_string_pretty(&config).map_err(|e| AuthError::ConfigWrite(e.to_string()))?;
    print!("{rendered}");

    if let Err(e) = config.validate() {
        println!();
        println!("# Warning: {e}");
    }

    Ok(())
}

/// Handles the `tenantlink completions <shell>` command.
///
/// Generates shell completion scripts.
pub fn handle_completions(shell: ShellType) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::{generate, Shell};

    let mut cmd = crate::cli::Cli::command();
    let shell = match shell {
        ShellType::Bash => Shell::Bash,
        ShellType::Zsh => Shell::Zsh,
        ShellType::Fish => Shell::Fish,
        ShellType::PowerShell => Shell::PowerShell,
    };

    generate(shell, &mut cmd, "tenantlink", &mut std::io::stdout());

    Ok(())
}
