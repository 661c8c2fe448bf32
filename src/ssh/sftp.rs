//! SFTP sessions over the `sftp` subsystem

use std::future::Future;
use std::path::Path;

use russh_sftp::client::fs::Metadata;
use russh_sftp::protocol::OpenFlags;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::Transport;
use super::SessionStatus;
use crate::config::Settings;
use crate::error::{Error, ErrorKind, Result};

/// Size limits applied to transfers
#[derive(Debug, Clone, Copy)]
pub struct TransferLimits {
    /// Largest file read or written in one piece
    pub max_file_bytes: u64,
    /// Buffer size for streamed download and upload
    pub chunk_bytes: usize,
}

impl TransferLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_file_bytes: settings.max_file_bytes,
            chunk_bytes: settings.transfer_chunk_bytes,
        }
    }
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Absolute remote path
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Seconds since the Unix epoch, when the server reports it
    pub modified: Option<u64>,
    /// `ls -l` style mode string, e.g. `drwxr-xr-x`
    pub permissions: String,
}

impl DirectoryEntry {
    fn new(dir: &str, name: String, metadata: &Metadata) -> Self {
        let is_dir = metadata.file_type().is_dir();
        Self {
            path: join_remote(dir, &name),
            name,
            is_dir,
            size: metadata.size.unwrap_or(0),
            modified: metadata.mtime.map(u64::from),
            permissions: format_permissions(metadata.permissions, is_dir),
        }
    }
}

fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

fn format_permissions(mode: Option<u32>, is_dir: bool) -> String {
    const BITS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];

    let mode = mode.unwrap_or(0);
    let kind = match mode & 0o170000 {
        0o120000 => 'l',
        _ if is_dir => 'd',
        _ => '-',
    };

    std::iter::once(kind)
        .chain(
            BITS.iter()
                .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' }),
        )
        .collect()
}

pub struct SftpSession {
    id: String,
    profile_id: String,
    sftp: russh_sftp::client::SftpSession,
    transport: tokio::sync::Mutex<Option<Transport>>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    limits: TransferLimits,
}

impl SftpSession {
    /// Start the `sftp` subsystem on `transport`
    pub async fn open(
        id: String,
        profile_id: String,
        transport: Transport,
        limits: TransferLimits,
    ) -> Result<Self> {
        let channel = transport.open_session_channel().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream()).await?;

        info!(session = %id, target = %transport.target(), "sftp opened");
        Ok(Self::with_client(id, profile_id, sftp, Some(transport), limits))
    }

    /// Run the SFTP protocol over an already-established byte stream
    pub(crate) async fn from_stream<S>(
        id: String,
        profile_id: String,
        stream: S,
        limits: TransferLimits,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let sftp = russh_sftp::client::SftpSession::new(stream).await?;
        Ok(Self::with_client(id, profile_id, sftp, None, limits))
    }

    fn with_client(
        id: String,
        profile_id: String,
        sftp: russh_sftp::client::SftpSession,
        transport: Option<Transport>,
        limits: TransferLimits,
    ) -> Self {
        Self {
            id,
            profile_id,
            sftp,
            transport: tokio::sync::Mutex::new(transport),
            status: watch::channel(SessionStatus::Connected).0,
            cancel: CancellationToken::new(),
            limits,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Entries of `path` in server order, without `.` and `..`
    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        self.guarded("list_dir", async {
            let dir = self.sftp.canonicalize(path).await?;
            let entries = self
                .sftp
                .read_dir(dir.as_str())
                .await?
                .filter(|entry| {
                    let name = entry.file_name();
                    name != "." && name != ".."
                })
                .map(|entry| DirectoryEntry::new(&dir, entry.file_name(), &entry.metadata()))
                .collect();
            Ok(entries)
        })
        .await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.guarded("read_file", async {
            let size = self.sftp.metadata(path).await?.size.unwrap_or(0);
            self.check_size(path, size)?;

            let mut file = self.sftp.open(path).await?;
            let mut contents = Vec::with_capacity(size as usize);
            (&mut file)
                .take(self.limits.max_file_bytes.saturating_add(1))
                .read_to_end(&mut contents)
                .await?;
            file.shutdown().await?;

            self.check_size(path, contents.len() as u64)?;
            Ok(contents)
        })
        .await
    }

    /// Replace the whole content of `path`, creating it if needed
    pub async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.check_size(path, contents.len() as u64)?;
        self.guarded("write_file", async {
            let mut file = self.sftp.create(path).await?;
            file.write_all(contents).await?;
            file.shutdown().await?;
            Ok(())
        })
        .await
    }

    /// Create an empty file; fails if `path` already exists
    pub async fn create_file(&self, path: &str) -> Result<()> {
        self.guarded("create_file", async {
            let mut file = self
                .sftp
                .open_with_flags(path, OpenFlags::CREATE | OpenFlags::EXCLUDE | OpenFlags::WRITE)
                .await?;
            file.shutdown().await?;
            Ok(())
        })
        .await
    }

    pub async fn create_dir(&self, path: &str) -> Result<()> {
        self.guarded("create_dir", async { Ok(self.sftp.create_dir(path).await?) })
            .await
    }

    pub async fn delete(&self, path: &str, is_dir: bool) -> Result<()> {
        self.guarded("delete", async {
            if is_dir {
                self.sftp.remove_dir(path).await?;
            } else {
                self.sftp.remove_file(path).await?;
            }
            Ok(())
        })
        .await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.guarded("rename", async { Ok(self.sftp.rename(old_path, new_path).await?) })
            .await
    }

    /// Stream a remote file to `local_path`, returning the bytes copied
    pub async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        self.guarded("download", async {
            let mut remote = self.sftp.open(remote_path).await?;
            let mut local = tokio::fs::File::create(local_path).await?;

            let copied = copy_chunked(&mut remote, &mut local, self.limits.chunk_bytes).await?;
            local.sync_all().await?;
            remote.shutdown().await?;

            debug!(session = %self.id, remote = remote_path, bytes = copied, "downloaded");
            Ok(copied)
        })
        .await
    }

    /// Stream `local_path` to a remote file, returning the bytes copied
    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        self.guarded("upload", async {
            let mut local = tokio::fs::File::open(local_path).await?;
            let mut remote = self.sftp.create(remote_path).await?;

            let copied = copy_chunked(&mut local, &mut remote, self.limits.chunk_bytes).await?;
            remote.shutdown().await?;

            debug!(session = %self.id, remote = remote_path, bytes = copied, "uploaded");
            Ok(copied)
        })
        .await
    }

    /// Absolute path of the login directory
    pub async fn home_dir(&self) -> Result<String> {
        self.guarded("home_dir", async { Ok(self.sftp.canonicalize(".").await?) })
            .await
    }

    /// End the SFTP subsystem and the SSH connection. Safe to call twice.
    pub async fn close(&self) {
        self.cancel.cancel();

        let was_open = self.status.send_if_modified(|status| {
            if status.is_terminal() {
                return false;
            }
            *status = SessionStatus::Closed;
            true
        });
        if was_open {
            if let Err(e) = self.sftp.close().await {
                debug!(session = %self.id, error = %e, "sftp close");
            }
        }

        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        info!(session = %self.id, "sftp closed");
    }

    fn check_size(&self, path: &str, size: u64) -> Result<()> {
        if size > self.limits.max_file_bytes {
            return Err(Error::Validation(format!(
                "{} is {} bytes, larger than the {} byte limit",
                path, size, self.limits.max_file_bytes
            )));
        }
        Ok(())
    }

    /// Run `op` unless the session is closed, abandoning it if the session is
    /// closed meanwhile. A connection-level failure marks the session errored.
    async fn guarded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        if !self.status.borrow().is_connected() {
            return Err(Error::not_connected(&self.id));
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::not_connected(&self.id)),
            result = fut => result,
        };

        if let Err(e) = &result {
            if e.kind() == ErrorKind::Connection {
                warn!(session = %self.id, op, error = %e, "sftp connection lost");
                let reason = e.to_string();
                self.status.send_if_modified(|status| {
                    if status.is_connected() {
                        *status = SessionStatus::Errored(reason);
                        true
                    } else {
                        false
                    }
                });
            } else {
                debug!(session = %self.id, op, error = %e, "sftp operation failed");
            }
        }
        result
    }
}

async fn copy_chunked<R, W>(reader: &mut R, writer: &mut W, chunk_bytes: usize) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_bytes];
    let mut copied = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }

    writer.flush().await?;
    Ok(copied)
}
