//! tenantlink - dual-tenant authentication for cross-tenant tooling.
//!
//! Signs a user into a source and a target Microsoft Entra tenant at the same
//! time, keeps both credentials encrypted at rest and refreshes them before
//! they expire. The library exposes [`auth::AuthOrchestrator`] for embedding;
//! the `tenantlink` binary drives it from a terminal.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;

pub use error::{AuthError, Result};
