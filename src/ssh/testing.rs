//! In-process stand-ins for remote peers: a scripted shell channel and an
//! in-memory filesystem behind a `russh-sftp` server.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::shell::{Inbound, ShellChannel};
use super::TerminalSize;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ShellState {
    written: Vec<u8>,
    resizes: Vec<TerminalSize>,
    closed: bool,
    fail_writes: bool,
}

pub(crate) struct FakeShell {
    inbound: mpsc::UnboundedReceiver<Option<Inbound>>,
    loopback: mpsc::UnboundedSender<Option<Inbound>>,
    echo: bool,
    state: Arc<Mutex<ShellState>>,
}

/// Test-side handle for driving a [`FakeShell`]
pub(crate) struct FakeRemote {
    tx: mpsc::UnboundedSender<Option<Inbound>>,
    state: Arc<Mutex<ShellState>>,
}

/// A shell channel; with `echo` every write comes back as output
pub(crate) fn fake_shell(echo: bool) -> (FakeShell, FakeRemote) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(Mutex::new(ShellState::default()));
    (
        FakeShell {
            inbound: rx,
            loopback: tx.clone(),
            echo,
            state: state.clone(),
        },
        FakeRemote { tx, state },
    )
}

impl FakeRemote {
    pub(crate) fn send(&self, msg: Inbound) {
        let _ = self.tx.send(Some(msg));
    }

    /// Remote closes the channel
    pub(crate) fn close_channel(&self) {
        let _ = self.tx.send(Some(Inbound::Closed));
    }

    /// Channel vanishes without a close, as when the TCP connection drops
    pub(crate) fn drop_connection(&self) {
        let _ = self.tx.send(None);
    }

    pub(crate) fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub(crate) fn resizes(&self) -> Vec<TerminalSize> {
        self.state.lock().unwrap().resizes.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl ShellChannel for FakeShell {
    async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await.flatten()
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(Error::Connection("connection reset by peer".into()));
            }
            state.written.extend_from_slice(data);
        }
        if self.echo {
            let _ = self.loopback.send(Some(Inbound::Data(data.to_vec())));
        }
        Ok(())
    }

    async fn window_change(&mut self, size: TerminalSize) -> Result<()> {
        self.state.lock().unwrap().resizes.push(size);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

// ---------------------------------------------------------------------------
// SFTP
// ---------------------------------------------------------------------------

const MTIME: u32 = 1_700_000_000;

#[derive(Default)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Tree {
    fn ensure_dirs(&mut self, path: &str) {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            self.dirs.insert(current.clone());
        }
    }

    fn has_parent(&self, path: &str) -> bool {
        let parent = parent_of(path);
        parent == "/" || self.dirs.contains(parent)
    }

    fn children(&self, dir: &str) -> Vec<File> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        let direct = |path: &&String| {
            path.strip_prefix(&prefix)
                .map_or(false, |rest| !rest.is_empty() && !rest.contains('/'))
        };

        let mut entries: BTreeMap<String, FileAttributes> = BTreeMap::new();
        for path in self.dirs.iter().filter(direct) {
            entries.insert(path[prefix.len()..].to_string(), dir_attrs());
        }
        for (path, data) in self.files.iter().filter(|(p, _)| direct(p)) {
            entries.insert(path[prefix.len()..].to_string(), file_attrs(data.len()));
        }
        entries
            .into_iter()
            .map(|(name, attrs)| File::new(name, attrs))
            .collect()
    }

    fn attrs(&self, path: &str) -> Option<FileAttributes> {
        if path == "/" || self.dirs.contains(path) {
            Some(dir_attrs())
        } else {
            self.files.get(path).map(|data| file_attrs(data.len()))
        }
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn normalize(path: &str) -> String {
    let absolute = if path.is_empty() || path == "." {
        MemoryFs::HOME.to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", MemoryFs::HOME, path)
    };

    let trimmed = absolute.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn file_attrs(len: usize) -> FileAttributes {
    FileAttributes {
        size: Some(len as u64),
        permissions: Some(0o100644),
        atime: Some(MTIME),
        mtime: Some(MTIME),
        ..FileAttributes::empty()
    }
}

fn dir_attrs() -> FileAttributes {
    FileAttributes {
        size: Some(4096),
        permissions: Some(0o040755),
        atime: Some(MTIME),
        mtime: Some(MTIME),
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

/// In-memory filesystem reachable through an SFTP server
#[derive(Clone)]
pub(crate) struct MemoryFs {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryFs {
    pub(crate) const HOME: &'static str = "/home/tester";

    pub(crate) fn new() -> Self {
        let mut tree = Tree::default();
        tree.ensure_dirs(Self::HOME);
        tree.ensure_dirs("/tmp");
        Self {
            tree: Arc::new(Mutex::new(tree)),
        }
    }

    pub(crate) fn put_file(&self, path: &str, data: &[u8]) {
        let mut tree = self.tree.lock().unwrap();
        tree.ensure_dirs(parent_of(path));
        tree.files.insert(path.to_string(), data.to_vec());
    }

    pub(crate) fn put_dir(&self, path: &str) {
        self.tree.lock().unwrap().ensure_dirs(path);
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.tree.lock().unwrap().files.get(path).cloned()
    }

    pub(crate) fn has_dir(&self, path: &str) -> bool {
        self.tree.lock().unwrap().dirs.contains(path)
    }

    /// Client end of a fresh connection to this filesystem
    pub(crate) fn serve(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let handler = MemorySftp {
            tree: self.tree.clone(),
            handles: HashMap::new(),
            next_handle: 0,
        };
        tokio::spawn(russh_sftp::server::run(server, handler));
        client
    }
}

enum OpenHandle {
    File(String),
    Dir(Option<Vec<File>>),
}

struct MemorySftp {
    tree: Arc<Mutex<Tree>>,
    handles: HashMap<String, OpenHandle>,
    next_handle: u32,
}

impl MemorySftp {
    fn new_handle(&mut self, id: u32, handle: OpenHandle) -> Handle {
        self.next_handle += 1;
        let name = format!("h{}", self.next_handle);
        self.handles.insert(name.clone(), handle);
        Handle { id, handle: name }
    }

    fn path_attrs(&self, id: u32, path: &str) -> std::result::Result<Attrs, StatusCode> {
        let attrs = self.tree.lock().unwrap().attrs(&normalize(path));
        attrs
            .map(|attrs| Attrs { id, attrs })
            .ok_or(StatusCode::NoSuchFile)
    }

    fn file_path(&self, handle: &str) -> std::result::Result<String, StatusCode> {
        match self.handles.get(handle) {
            Some(OpenHandle::File(path)) => Ok(path.clone()),
            _ => Err(StatusCode::Failure),
        }
    }
}

impl russh_sftp::server::Handler for MemorySftp {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> std::result::Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> std::result::Result<Handle, Self::Error> {
        let path = normalize(&filename);
        {
            let mut tree = self.tree.lock().unwrap();
            if tree.dirs.contains(&path) {
                return Err(StatusCode::Failure);
            }
            let exists = tree.files.contains_key(&path);
            if exists && pflags.contains(OpenFlags::EXCLUDE) {
                return Err(StatusCode::Failure);
            }
            if !exists {
                if !pflags.contains(OpenFlags::CREATE) || !tree.has_parent(&path) {
                    return Err(StatusCode::NoSuchFile);
                }
                tree.files.insert(path.clone(), Vec::new());
            } else if pflags.contains(OpenFlags::TRUNCATE) {
                tree.files.insert(path.clone(), Vec::new());
            }
        }
        Ok(self.new_handle(id, OpenHandle::File(path)))
    }

    async fn close(&mut self, id: u32, handle: String) -> std::result::Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(ok(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> std::result::Result<Data, Self::Error> {
        let path = self.file_path(&handle)?;
        let tree = self.tree.lock().unwrap();
        let data = tree.files.get(&path).ok_or(StatusCode::NoSuchFile)?;

        let offset = offset as usize;
        if offset >= data.len() {
            return Err(StatusCode::Eof);
        }
        let end = data.len().min(offset + len as usize);
        Ok(Data {
            id,
            data: data[offset..end].to_vec(),
        })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        chunk: Vec<u8>,
    ) -> std::result::Result<Status, Self::Error> {
        let path = self.file_path(&handle)?;
        let mut tree = self.tree.lock().unwrap();
        let data = tree.files.get_mut(&path).ok_or(StatusCode::NoSuchFile)?;

        let offset = offset as usize;
        if data.len() < offset + chunk.len() {
            data.resize(offset + chunk.len(), 0);
        }
        data[offset..offset + chunk.len()].copy_from_slice(&chunk);
        Ok(ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> std::result::Result<Attrs, Self::Error> {
        self.path_attrs(id, &path)
    }

    async fn lstat(&mut self, id: u32, path: String) -> std::result::Result<Attrs, Self::Error> {
        self.path_attrs(id, &path)
    }

    async fn fstat(&mut self, id: u32, handle: String) -> std::result::Result<Attrs, Self::Error> {
        let path = self.file_path(&handle)?;
        let attrs = self.tree.lock().unwrap().attrs(&path);
        attrs.map(|attrs| Attrs { id, attrs }).ok_or(StatusCode::Failure)
    }

    async fn opendir(&mut self, id: u32, path: String) -> std::result::Result<Handle, Self::Error> {
        let path = normalize(&path);
        let entries = {
            let tree = self.tree.lock().unwrap();
            if !tree.attrs(&path).map_or(false, |attrs| attrs.is_dir()) {
                return Err(StatusCode::NoSuchFile);
            }
            let mut entries = vec![File::new(".", dir_attrs()), File::new("..", dir_attrs())];
            entries.extend(tree.children(&path));
            entries
        };
        Ok(self.new_handle(id, OpenHandle::Dir(Some(entries))))
    }

    async fn readdir(&mut self, id: u32, handle: String) -> std::result::Result<Name, Self::Error> {
        match self.handles.get_mut(&handle) {
            Some(OpenHandle::Dir(pending)) => match pending.take() {
                Some(files) => Ok(Name { id, files }),
                None => Err(StatusCode::Eof),
            },
            _ => Err(StatusCode::Failure),
        }
    }

    async fn remove(&mut self, id: u32, filename: String) -> std::result::Result<Status, Self::Error> {
        match self.tree.lock().unwrap().files.remove(&normalize(&filename)) {
            Some(_) => Ok(ok(id)),
            None => Err(StatusCode::NoSuchFile),
        }
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> std::result::Result<Status, Self::Error> {
        let path = normalize(&path);
        let mut tree = self.tree.lock().unwrap();
        if tree.attrs(&path).is_some() {
            Err(StatusCode::Failure)
        } else if !tree.has_parent(&path) {
            Err(StatusCode::NoSuchFile)
        } else {
            tree.dirs.insert(path);
            Ok(ok(id))
        }
    }

    async fn rmdir(&mut self, id: u32, path: String) -> std::result::Result<Status, Self::Error> {
        let path = normalize(&path);
        let mut tree = self.tree.lock().unwrap();
        if !tree.dirs.contains(&path) {
            Err(StatusCode::NoSuchFile)
        } else if !tree.children(&path).is_empty() {
            Err(StatusCode::Failure)
        } else {
            tree.dirs.remove(&path);
            Ok(ok(id))
        }
    }

    async fn realpath(&mut self, id: u32, path: String) -> std::result::Result<Name, Self::Error> {
        Ok(Name {
            id,
            files: vec![File::dummy(normalize(&path))],
        })
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> std::result::Result<Status, Self::Error> {
        let from = normalize(&oldpath);
        let to = normalize(&newpath);
        let mut tree = self.tree.lock().unwrap();
        if tree.attrs(&to).is_some() || !tree.has_parent(&to) {
            Err(StatusCode::Failure)
        } else if let Some(data) = tree.files.remove(&from) {
            tree.files.insert(to, data);
            Ok(ok(id))
        } else if tree.dirs.contains(&from) && tree.children(&from).is_empty() {
            tree.dirs.remove(&from);
            tree.dirs.insert(to);
            Ok(ok(id))
        } else {
            Err(StatusCode::NoSuchFile)
        }
    }
}
