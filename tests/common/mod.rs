//! In-process SSH server for session tests.
//!
//! Accepts one password, echoes shell input back (`exit` ends the shell with
//! status 0) and serves the `sftp` subsystem from a local directory. Every
//! connection runs behind a relay so tests can cut it like a dropped link.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub port: u16,
    relays: Arc<Mutex<Vec<JoinHandle<()>>>>,
    acceptor: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(password: &str, sftp_root: &Path) -> Self {
        let mut config = server::Config::default();
        config.auth_rejection_time = Duration::from_millis(10);
        config.auth_rejection_time_initial = Some(Duration::ZERO);
        config.keys = vec![russh_keys::key::KeyPair::generate_ed25519().unwrap()];
        let config = Arc::new(config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let relays = Arc::new(Mutex::new(Vec::new()));

        let password = password.to_string();
        let root = sftp_root.to_path_buf();
        let tracked = relays.clone();
        let acceptor = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let (mut outer, inner) = tokio::io::duplex(64 * 1024);

                let handler = EchoShell {
                    password: password.clone(),
                    root: root.clone(),
                    channels: HashMap::new(),
                    shells: HashSet::new(),
                };
                let config = config.clone();
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, inner, handler).await {
                        let _ = session.await;
                    }
                });

                let relay = tokio::spawn(async move {
                    let _ = tokio::io::copy_bidirectional(&mut socket, &mut outer).await;
                });
                tracked.lock().unwrap().push(relay);
            }
        });

        Self {
            port,
            relays,
            acceptor,
        }
    }

    /// Cut every open connection without any SSH-level goodbye
    pub fn drop_connections(&self) {
        for relay in self.relays.lock().unwrap().drain(..) {
            relay.abort();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.acceptor.abort();
        self.drop_connections();
    }
}

struct EchoShell {
    password: String,
    root: PathBuf,
    channels: HashMap<ChannelId, Channel<Msg>>,
    shells: HashSet<ChannelId>,
}

#[async_trait]
impl server::Handler for EchoShell {
    type Error = russh::Error;

    async fn auth_password(&mut self, _user: &str, password: &str) -> Result<Auth, Self::Error> {
        if password == self.password {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.shells.insert(channel);
        session.data(channel, CryptoVec::from_slice(b"$ "));
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        if !self.shells.contains(&channel) {
            return Ok(());
        }
        if data == b"exit\n" {
            session.exit_status_request(channel, 0);
            session.eof(channel);
            session.close(channel);
        } else {
            session.data(channel, CryptoVec::from_slice(data));
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.channels.remove(&channel_id) {
            Some(channel) if name == "sftp" => {
                session.channel_success(channel_id);
                let sftp = DirSftp {
                    root: self.root.clone(),
                    handles: HashMap::new(),
                    next_handle: 0,
                };
                russh_sftp::server::run(channel.into_stream(), sftp).await;
            }
            _ => session.channel_failure(channel_id),
        }
        Ok(())
    }
}

enum OpenHandle {
    File(std::fs::File),
    Dir(Option<Vec<File>>),
}

/// SFTP over a local directory, which the client sees as `/`
struct DirSftp {
    root: PathBuf,
    handles: HashMap<String, OpenHandle>,
    next_handle: u32,
}

impl DirSftp {
    fn local(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }

    fn new_handle(&mut self, id: u32, handle: OpenHandle) -> Handle {
        self.next_handle += 1;
        let name = format!("h{}", self.next_handle);
        self.handles.insert(name.clone(), handle);
        Handle { id, handle: name }
    }

    fn file(&mut self, handle: &str) -> Result<&mut std::fs::File, StatusCode> {
        match self.handles.get_mut(handle) {
            Some(OpenHandle::File(file)) => Ok(file),
            _ => Err(StatusCode::Failure),
        }
    }
}

fn status_of(e: std::io::Error) -> StatusCode {
    match e.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn attrs_of(metadata: &std::fs::Metadata) -> FileAttributes {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as u32);
    FileAttributes {
        size: Some(metadata.len()),
        permissions: Some(if metadata.is_dir() { 0o040755 } else { 0o100644 }),
        atime: mtime,
        mtime,
        ..FileAttributes::empty()
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

impl russh_sftp::server::Handler for DirSftp {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let path = match path.as_str() {
            "" | "." => "/".to_string(),
            other => other.to_string(),
        };
        Ok(Name {
            id,
            files: vec![File::dummy(path)],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = std::fs::metadata(self.local(&path)).map_err(status_of)?;
        Ok(Attrs {
            id,
            attrs: attrs_of(&metadata),
        })
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let mut options = OpenOptions::new();
        options
            .read(pflags.contains(OpenFlags::READ))
            .write(pflags.contains(OpenFlags::WRITE))
            .truncate(pflags.contains(OpenFlags::TRUNCATE));
        if pflags.contains(OpenFlags::EXCLUDE) {
            options.create_new(true);
        } else {
            options.create(pflags.contains(OpenFlags::CREATE));
        }

        let file = options.open(self.local(&filename)).map_err(status_of)?;
        Ok(self.new_handle(id, OpenHandle::File(file)))
    }

    async fn read(&mut self, id: u32, handle: String, offset: u64, len: u32) -> Result<Data, Self::Error> {
        let file = self.file(&handle)?;
        file.seek(SeekFrom::Start(offset)).map_err(status_of)?;

        let mut data = vec![0u8; len as usize];
        let n = file.read(&mut data).map_err(status_of)?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn write(&mut self, id: u32, handle: String, offset: u64, data: Vec<u8>) -> Result<Status, Self::Error> {
        let file = self.file(&handle)?;
        file.seek(SeekFrom::Start(offset)).map_err(status_of)?;
        file.write_all(&data).map_err(status_of)?;
        Ok(ok(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(ok(id))
    }

    async fn mkdir(&mut self, id: u32, path: String, _attrs: FileAttributes) -> Result<Status, Self::Error> {
        std::fs::create_dir(self.local(&path)).map_err(status_of)?;
        Ok(ok(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(self.local(&path)).map_err(status_of)? {
            let entry = entry.map_err(status_of)?;
            let metadata = entry.metadata().map_err(status_of)?;
            files.push(File::new(
                entry.file_name().to_string_lossy().into_owned(),
                attrs_of(&metadata),
            ));
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(self.new_handle(id, OpenHandle::Dir(Some(files))))
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        match self.handles.get_mut(&handle) {
            Some(OpenHandle::Dir(pending)) => pending
                .take()
                .map(|files| Name { id, files })
                .ok_or(StatusCode::Eof),
            _ => Err(StatusCode::Failure),
        }
    }
}
