//! SSH client implementation using russh
//!
//! - `transport`: dial (direct, proxy or jump host), handshake, authentication
//! - `shell`: interactive pty shell sessions
//! - `sftp`: file-transfer sessions over the `sftp` subsystem

mod handler;
mod shell;
mod sftp;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};

pub use handler::ClientHandler;
pub use sftp::{DirectoryEntry, SftpSession, TransferLimits};
pub use shell::{EventReceiver, SessionEvent, ShellSession};
pub use transport::{ConnectOptions, Transport};

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u32,
    pub rows: u32,
}

impl TerminalSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Shell,
    Sftp,
}

/// Connecting → Connected → {Closed | Errored}; terminal states are final
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Closed,
    Errored(String),
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionStatus::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Errored(_))
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Connecting => f.write_str("connecting"),
            SessionStatus::Connected => f.write_str("connected"),
            SessionStatus::Closed => f.write_str("closed"),
            SessionStatus::Errored(reason) => write!(f, "errored: {}", reason),
        }
    }
}
