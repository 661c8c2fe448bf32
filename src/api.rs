//! Backend facade: the credential store plus the live session registry,
//! exposed as one set of calls keyed by server id or session id.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::info;

use crate::config::{CredentialStore, ProfileSummary, ServerProfile, Settings};
use crate::crypto::BackupBlob;
use crate::error::{Error, Result};
use crate::registry::{SessionId, SessionInfo, SessionRegistry};
use crate::ssh::{DirectoryEntry, EventReceiver, SessionStatus, TerminalSize};

pub struct Backend {
    settings: Settings,
    store: Mutex<CredentialStore>,
    sessions: SessionRegistry,
}

impl Backend {
    /// Unlock (or create) the credential store in `settings.data_dir`
    pub fn open(settings: Settings, master_password: &[u8]) -> Result<Self> {
        let store = CredentialStore::open(settings.store_path(), master_password, &settings.kdf)?;
        let sessions = SessionRegistry::new(&settings);

        Ok(Self {
            settings,
            store: Mutex::new(store),
            sessions,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn store(&self) -> MutexGuard<'_, CredentialStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ----- server profiles -------------------------------------------------

    pub fn get_servers(&self) -> Vec<ProfileSummary> {
        self.store().list()
    }

    pub fn get_server(&self, id: &str) -> Result<ServerProfile> {
        self.store().get(id)
    }

    /// Look a profile up by id or by unique name
    pub fn find_server(&self, id_or_name: &str) -> Result<ServerProfile> {
        self.store().find(id_or_name)
    }

    pub fn save_server(&self, profile: ServerProfile) -> Result<String> {
        self.store().save(profile)
    }

    pub fn delete_server(&self, id: &str) -> Result<()> {
        self.store().delete(id)
    }

    /// Encrypted backup of every profile, as base64 text
    pub fn export_servers(&self, password: &[u8]) -> Result<String> {
        Ok(self.store().export(password)?.to_base64())
    }

    pub fn import_servers(&self, blob: &str, password: &[u8]) -> Result<usize> {
        let blob = BackupBlob::from_base64(blob)?;
        self.store().import(&blob, password)
    }

    pub fn change_master_password(&self, new_password: &[u8]) -> Result<()> {
        self.store().change_password(new_password)
    }

    /// The profile to connect to and its jump host, if it has one
    fn connect_target(&self, server_id: &str) -> Result<(ServerProfile, Option<ServerProfile>)> {
        let store = self.store();
        let profile = store.get(server_id)?;
        let jump = match &profile.jump_host {
            Some(jump_id) => Some(store.get(jump_id).map_err(|_| {
                Error::NotFound(format!("jump host '{}' of server '{}'", jump_id, profile.name))
            })?),
            None => None,
        };
        Ok((profile, jump))
    }

    // ----- shell sessions --------------------------------------------------

    pub async fn ssh_connect(&self, server_id: &str, cols: u32, rows: u32) -> Result<SessionId> {
        let (profile, jump) = self.connect_target(server_id)?;
        let id = self
            .sessions
            .connect_shell(&profile, jump.as_ref(), TerminalSize::new(cols, rows))
            .await?;
        info!(session = %id, server = %profile.name, "shell session started");
        Ok(id)
    }

    pub async fn ssh_write(&self, session_id: &str, data: &[u8]) -> Result<()> {
        self.sessions.write(session_id, data).await
    }

    pub async fn ssh_resize(&self, session_id: &str, cols: u32, rows: u32) -> Result<()> {
        self.sessions
            .resize(session_id, TerminalSize::new(cols, rows))
            .await
            .map(|_| ())
    }

    /// Inbound events of a shell session; allowed once per session
    pub async fn ssh_subscribe(&self, session_id: &str) -> Result<EventReceiver> {
        self.sessions.subscribe(session_id).await
    }

    pub async fn ssh_disconnect(&self, session_id: &str) {
        self.sessions.disconnect(session_id).await
    }

    // ----- sftp sessions ---------------------------------------------------

    pub async fn sftp_connect(&self, server_id: &str) -> Result<SessionId> {
        let (profile, jump) = self.connect_target(server_id)?;
        let id = self.sessions.connect_sftp(&profile, jump.as_ref()).await?;
        info!(session = %id, server = %profile.name, "sftp session started");
        Ok(id)
    }

    pub async fn sftp_list_dir(&self, session_id: &str, path: &str) -> Result<Vec<DirectoryEntry>> {
        self.sessions.sftp(session_id).await?.list_dir(path).await
    }

    pub async fn sftp_read_file(&self, session_id: &str, path: &str) -> Result<Vec<u8>> {
        self.sessions.sftp(session_id).await?.read_file(path).await
    }

    pub async fn sftp_write_file(&self, session_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        self.sessions.sftp(session_id).await?.write_file(path, contents).await
    }

    pub async fn sftp_delete(&self, session_id: &str, path: &str, is_dir: bool) -> Result<()> {
        self.sessions.sftp(session_id).await?.delete(path, is_dir).await
    }

    pub async fn sftp_rename(&self, session_id: &str, old_path: &str, new_path: &str) -> Result<()> {
        self.sessions.sftp(session_id).await?.rename(old_path, new_path).await
    }

    pub async fn sftp_create_dir(&self, session_id: &str, path: &str) -> Result<()> {
        self.sessions.sftp(session_id).await?.create_dir(path).await
    }

    pub async fn sftp_create_file(&self, session_id: &str, path: &str) -> Result<()> {
        self.sessions.sftp(session_id).await?.create_file(path).await
    }

    pub async fn sftp_download(&self, session_id: &str, remote_path: &str, local_path: &Path) -> Result<u64> {
        self.sessions.sftp(session_id).await?.download(remote_path, local_path).await
    }

    pub async fn sftp_upload(&self, session_id: &str, local_path: &Path, remote_path: &str) -> Result<u64> {
        self.sessions.sftp(session_id).await?.upload(local_path, remote_path).await
    }

    pub async fn sftp_home_dir(&self, session_id: &str) -> Result<String> {
        self.sessions.sftp(session_id).await?.home_dir().await
    }

    pub async fn sftp_disconnect(&self, session_id: &str) {
        self.sessions.disconnect(session_id).await
    }

    // ----- lifecycle -------------------------------------------------------

    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatus> {
        self.sessions.status(session_id).await
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list().await
    }

    /// Disconnect every live session. Call before exiting.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await
    }
}
