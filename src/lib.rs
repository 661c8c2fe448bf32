//! shellvault - encrypted SSH/SFTP profile vault
//!
//! This crate provides:
//! - An encrypted store of server profiles, unlocked by a master password
//! - Password-protected backup export and import of those profiles
//! - Concurrent interactive shell and SFTP sessions over SSH, optionally
//!   through a SOCKS5/HTTP proxy or a jump host
//! - A [`Backend`] that exposes all of it keyed by server id and session id

pub mod api;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod ssh;

pub use api::Backend;
pub use error::{Error, ErrorKind, Result};
