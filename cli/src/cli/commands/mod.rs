//! Command implementations.

pub mod auth;
pub mod config;

pub use auth::{
    handle_login, handle_logout, handle_refresh, handle_status, handle_token, handle_watch,
};
pub use config::{handle_completions, handle_config_init, handle_config_show};
