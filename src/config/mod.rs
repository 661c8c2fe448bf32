//! Configuration management for shellvault
//!
//! Handles:
//! - Server profiles and their validation
//! - The encrypted credential store
//! - Runtime settings

mod profile;
mod settings;
mod store;

pub use profile::{AuthKind, AuthMethod, ProfileSummary, ProxyConfig, ProxyKind, ServerProfile};
pub use settings::{Settings, ENV_CONNECT_TIMEOUT, ENV_DATA_DIR};
pub use store::CredentialStore;
