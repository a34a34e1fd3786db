//! CLI module for tenantlink.

pub mod args;
pub mod commands;

pub use args::{AuthCommands, Cli, Commands, ConfigCommands, ShellType, SlotArg};
