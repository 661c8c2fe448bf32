//! Live session registry
//!
//! Sessions are keyed by a random UUID and only registered once fully
//! connected. A session that ends on its own stays registered with its
//! terminal status until it is disconnected.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::info;
use uuid::Uuid;

use crate::config::{ServerProfile, Settings};
use crate::error::{Error, Result};
use crate::ssh::{
    ConnectOptions, EventReceiver, SessionKind, SessionStatus, SftpSession, ShellSession,
    TerminalSize, TransferLimits, Transport,
};

pub type SessionId = String;

#[derive(Clone)]
pub enum Session {
    Shell(Arc<ShellSession>),
    Sftp(Arc<SftpSession>),
}

impl Session {
    pub fn id(&self) -> &str {
        match self {
            Session::Shell(s) => s.id(),
            Session::Sftp(s) => s.id(),
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            Session::Shell(_) => SessionKind::Shell,
            Session::Sftp(_) => SessionKind::Sftp,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            Session::Shell(s) => s.status(),
            Session::Sftp(s) => s.status(),
        }
    }

    fn info(&self) -> SessionInfo {
        let profile_id = match self {
            Session::Shell(s) => s.profile_id(),
            Session::Sftp(s) => s.profile_id(),
        };
        SessionInfo {
            id: self.id().to_string(),
            profile_id: profile_id.to_string(),
            kind: self.kind(),
            status: self.status(),
        }
    }

    async fn close(&self) {
        match self {
            Session::Shell(s) => s.close().await,
            Session::Sftp(s) => s.close().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub profile_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    options: ConnectOptions,
    limits: TransferLimits,
}

impl SessionRegistry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            options: ConnectOptions::from_settings(settings),
            limits: TransferLimits::from_settings(settings),
        }
    }

    /// Connect, authenticate and start a pty shell on `profile`
    pub async fn connect_shell(
        &self,
        profile: &ServerProfile,
        jump: Option<&ServerProfile>,
        size: TerminalSize,
    ) -> Result<SessionId> {
        if size.cols == 0 || size.rows == 0 {
            return Err(Error::Validation("terminal size must be at least 1x1".into()));
        }

        let id = Uuid::new_v4().to_string();
        let shell = self
            .bounded(profile, async {
                let transport = Transport::connect(profile, jump, &self.options).await?;
                ShellSession::open(id.clone(), profile.id.clone(), transport, size, &self.options.term).await
            })
            .await?;

        self.insert(Session::Shell(Arc::new(shell))).await;
        Ok(id)
    }

    /// Connect, authenticate and start the `sftp` subsystem on `profile`
    pub async fn connect_sftp(
        &self,
        profile: &ServerProfile,
        jump: Option<&ServerProfile>,
    ) -> Result<SessionId> {
        let id = Uuid::new_v4().to_string();
        let sftp = self
            .bounded(profile, async {
                let transport = Transport::connect(profile, jump, &self.options).await?;
                SftpSession::open(id.clone(), profile.id.clone(), transport, self.limits).await
            })
            .await?;

        self.insert(Session::Sftp(Arc::new(sftp))).await;
        Ok(id)
    }

    async fn bounded<T>(
        &self,
        profile: &ServerProfile,
        connect: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.options.connect_timeout;
        timeout(limit, connect).await.map_err(|_| {
            Error::Connection(format!(
                "timed out after {}s connecting to {}",
                limit.as_secs(),
                profile.connection_string()
            ))
        })?
    }

    pub(crate) async fn insert(&self, session: Session) {
        info!(
            session = %session.id(),
            kind = ?session.kind(),
            "session registered"
        );
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), session);
    }

    async fn get(&self, id: &str) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session '{}'", id)))
    }

    pub async fn shell(&self, id: &str) -> Result<Arc<ShellSession>> {
        match self.get(id).await? {
            Session::Shell(shell) => Ok(shell),
            Session::Sftp(_) => Err(Error::NotFound(format!("shell session '{}'", id))),
        }
    }

    pub async fn sftp(&self, id: &str) -> Result<Arc<SftpSession>> {
        match self.get(id).await? {
            Session::Sftp(sftp) => Ok(sftp),
            Session::Shell(_) => Err(Error::NotFound(format!("sftp session '{}'", id))),
        }
    }

    pub async fn write(&self, id: &str, data: &[u8]) -> Result<()> {
        self.shell(id).await?.write(data).await
    }

    pub async fn resize(&self, id: &str, size: TerminalSize) -> Result<bool> {
        self.shell(id).await?.resize(size).await
    }

    pub async fn subscribe(&self, id: &str) -> Result<EventReceiver> {
        self.shell(id).await?.subscribe()
    }

    pub async fn status(&self, id: &str) -> Result<SessionStatus> {
        Ok(self.get(id).await?.status())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(Session::info)
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Close and forget a session. Unknown ids are ignored.
    pub async fn disconnect(&self, id: &str) {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = removed {
            session.close().await;
            info!(session = %id, "session disconnected");
        }
    }

    /// Disconnect every session
    pub async fn shutdown(&self) {
        let sessions: Vec<Session> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "closing all sessions");
        }
        for session in sessions {
            session.close().await;
        }
    }
}
