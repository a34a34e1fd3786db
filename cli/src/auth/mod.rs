//! Authentication for the source and target tenants.
//!
//! Device-code sign-in against tenant-scoped identity provider endpoints,
//! encrypted per-slot credential storage and background refresh.

pub mod credentials;
pub mod device_flow;
pub mod encryption;
pub mod orchestrator;
pub mod providers;
pub mod refresh;
pub mod tokens;

pub use credentials::{CredentialStore, FileCredentialStore};
pub use device_flow::{open_browser, DeviceCodeSession, PollOutcome, PollStatus};
pub use encryption::TokenCipher;
pub use orchestrator::{AuthOrchestrator, TenantBindings};
pub use providers::{EntraProvider, IdentityProvider};
pub use refresh::RefreshOutcome;
pub use tokens::{AuthStatus, Credential, TenantSlot};
