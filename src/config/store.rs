//! Encrypted credential store
//!
//! The whole profile list lives in one envelope file (see
//! `crypto::envelope` for the layout). The file's salt is chosen when the
//! store is created; every write uses a fresh nonce. Backups are separate
//! envelopes with their own salt.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::{self, BackupBlob, DerivedKey, Envelope, KdfParams};
use crate::error::{Error, Result};

use super::{ProfileSummary, ServerProfile};

/// The serialized payload of both the store file and backups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServerList {
    servers: Vec<ServerProfile>,
}

pub struct CredentialStore {
    path: PathBuf,
    key: DerivedKey,
    servers: Vec<ServerProfile>,
}

impl CredentialStore {
    /// Open the store at `path`, creating an empty one if the file does not
    /// exist yet. `params` only applies to a newly created store; an existing
    /// file carries its own KDF parameters.
    pub fn open(path: impl Into<PathBuf>, master_password: &[u8], params: &KdfParams) -> Result<Self> {
        let path = path.into();

        if path.exists() {
            let data = fs::read(&path)?;
            let envelope = Envelope::from_bytes(&data)?;
            let key = envelope.derive(master_password)?;
            let plaintext = envelope.open_with_key(&key)?;
            let list: ServerList = serde_json::from_slice(&plaintext)?;

            info!(path = %path.display(), servers = list.servers.len(), "opened credential store");
            return Ok(Self {
                path,
                key,
                servers: list.servers,
            });
        }

        let key = crypto::derive_key(master_password, None, params)?;
        let store = Self {
            path,
            key,
            servers: Vec::new(),
        };
        store.persist(&store.servers, &store.key)?;
        info!(path = %store.path.display(), "created credential store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Summaries ordered by name (case-insensitive), then id
    pub fn list(&self) -> Vec<ProfileSummary> {
        let mut summaries: Vec<ProfileSummary> = self.servers.iter().map(ProfileSummary::from).collect();
        summaries.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    pub fn get(&self, id: &str) -> Result<ServerProfile> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Server '{}'", id)))
    }

    /// Look up by id, falling back to a unique name
    pub fn find(&self, id_or_name: &str) -> Result<ServerProfile> {
        if let Ok(profile) = self.get(id_or_name) {
            return Ok(profile);
        }

        let mut matches = self.servers.iter().filter(|s| s.name == id_or_name);
        match (matches.next(), matches.next()) {
            (Some(profile), None) => Ok(profile.clone()),
            (Some(_), Some(_)) => Err(Error::Validation(format!(
                "more than one server is named '{}', use its id",
                id_or_name
            ))),
            (None, _) => Err(Error::NotFound(format!("Server '{}'", id_or_name))),
        }
    }

    /// Insert or update a profile, returning its id
    pub fn save(&mut self, mut profile: ServerProfile) -> Result<String> {
        if profile.id.trim().is_empty() {
            profile.id = uuid::Uuid::new_v4().to_string();
        }
        profile.jump_host = profile.jump_host.filter(|j| !j.trim().is_empty());
        profile.validate()?;

        if let Some(jump) = &profile.jump_host {
            if !self.servers.iter().any(|s| &s.id == jump) {
                return Err(Error::Validation(format!("jump host '{}' does not exist", jump)));
            }
        }

        let now = now();
        profile.updated_at = now;

        let mut servers = self.servers.clone();
        match servers.iter_mut().find(|s| s.id == profile.id) {
            Some(existing) => {
                profile.created_at = existing.created_at;
                *existing = profile.clone();
            }
            None => {
                profile.created_at = now;
                servers.push(profile.clone());
            }
        }

        self.commit(servers)?;
        debug!(id = %profile.id, name = %profile.name, "saved server profile");
        Ok(profile.id)
    }

    /// Remove a profile; profiles that used it as jump host lose the reference
    pub fn delete(&mut self, id: &str) -> Result<()> {
        if !self.servers.iter().any(|s| s.id == id) {
            return Err(Error::NotFound(format!("Server '{}'", id)));
        }

        let servers = self
            .servers
            .iter()
            .filter(|s| s.id != id)
            .cloned()
            .map(|mut s| {
                if s.jump_host.as_deref() == Some(id) {
                    s.jump_host = None;
                }
                s
            })
            .collect();

        self.commit(servers)?;
        debug!(id, "deleted server profile");
        Ok(())
    }

    /// Encrypt every profile under `password` with a fresh salt and nonce
    pub fn export(&self, password: &[u8]) -> Result<BackupBlob> {
        let json = serde_json::to_vec(&ServerList {
            servers: self.servers.clone(),
        })?;
        let blob = Envelope::seal_with_password(password, &self.key.params, &json)?;
        info!(servers = self.servers.len(), "exported servers");
        Ok(blob)
    }

    /// Decrypt a backup and add its profiles under fresh ids.
    ///
    /// Jump-host links between imported profiles are remapped to the new
    /// ids; links to profiles outside the backup are dropped. Nothing is
    /// changed unless the whole backup decrypts and validates.
    pub fn import(&mut self, blob: &BackupBlob, password: &[u8]) -> Result<usize> {
        let plaintext = blob.open(password)?;
        let list: ServerList = serde_json::from_slice(&plaintext)?;

        let new_ids: Vec<String> = list
            .servers
            .iter()
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();

        let mut id_map: HashMap<String, String> = HashMap::new();
        for (profile, new_id) in list.servers.iter().zip(&new_ids) {
            id_map.entry(profile.id.clone()).or_insert_with(|| new_id.clone());
        }

        let now = now();
        let mut imported = Vec::with_capacity(list.servers.len());
        for (mut profile, new_id) in list.servers.into_iter().zip(new_ids) {
            profile.id = new_id;
            profile.jump_host = profile
                .jump_host
                .as_ref()
                .and_then(|old| id_map.get(old).cloned());
            if profile.created_at == 0 {
                profile.created_at = now;
            }
            profile.updated_at = now;
            profile.validate()?;
            imported.push(profile);
        }

        let count = imported.len();
        let mut servers = self.servers.clone();
        servers.extend(imported);
        self.commit(servers)?;

        info!(count, "imported servers");
        Ok(count)
    }

    /// Re-encrypt the store file under a new password and a fresh salt
    pub fn change_password(&mut self, new_password: &[u8]) -> Result<()> {
        let key = crypto::derive_key(new_password, None, &self.key.params)?;
        self.persist(&self.servers, &key)?;
        self.key = key;
        info!("master password changed");
        Ok(())
    }

    fn commit(&mut self, servers: Vec<ServerProfile>) -> Result<()> {
        self.persist(&servers, &self.key)?;
        self.servers = servers;
        Ok(())
    }

    /// Write the encrypted file atomically: temp file, fsync, rename
    fn persist(&self, servers: &[ServerProfile], key: &DerivedKey) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec(&ServerList {
            servers: servers.to_vec(),
        })?;
        let data = Envelope::seal(key, &json)?.to_bytes();

        let tmp = self.path.with_extension("enc.tmp");
        {
            let mut file = create_private(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Create `path` readable by the owner only, replacing any leftover file
fn create_private(path: &Path) -> std::io::Result<File> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
