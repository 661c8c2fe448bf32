//! Runtime settings
//!
//! Resolution order: built-in defaults, then `settings.json` in the data
//! directory, then environment variables. The CLI applies `--data-dir` last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::KdfParams;
use crate::error::{Error, Result};

const APP_DIR: &str = "shellvault";
const SETTINGS_FILE: &str = "settings.json";
const STORE_FILE: &str = "servers.enc";

/// Ceiling for `max_file_bytes`; whole-file reads are buffered in memory
pub const MAX_FILE_BYTES_LIMIT: u64 = 1024 * 1024 * 1024;

pub const ENV_DATA_DIR: &str = "SHELLVAULT_DATA_DIR";
pub const ENV_CONNECT_TIMEOUT: &str = "SHELLVAULT_CONNECT_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Upper bound for dial + proxy + handshake + auth + channel setup
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub inactivity_timeout_secs: u64,
    pub kdf: KdfParams,
    /// Largest file `read_file`/`write_file` will hold in memory
    pub max_file_bytes: u64,
    /// Chunk size for streamed download/upload
    pub transfer_chunk_bytes: usize,
    pub term: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            connect_timeout_secs: 30,
            keepalive_interval_secs: 30,
            inactivity_timeout_secs: 3600,
            kdf: KdfParams::default(),
            max_file_bytes: 64 * 1024 * 1024,
            transfer_chunk_bytes: 32 * 1024,
            term: "xterm-256color".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Settings {
    /// Defaults + settings file + environment. An explicit `data_dir`
    /// overrides both the environment and the default location.
    pub fn load(data_dir: Option<&Path>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::var_os(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
        };

        let mut settings = Self::load_from_dir(&data_dir)?;
        settings.apply_env()?;
        Ok(settings)
    }

    /// Defaults overlaid with `settings.json` from `dir`, if present.
    /// `data_dir` always ends up pointing at `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);

        let mut settings = if path.exists() {
            debug!(path = %path.display(), "loading settings");
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str::<Settings>(&content)
                .map_err(|e| Error::Validation(format!("{}: {}", path.display(), e)))?
        } else {
            Settings::default()
        };

        settings.data_dir = dir.to_path_buf();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_CONNECT_TIMEOUT) {
            self.connect_timeout_secs = value.trim().parse().map_err(|_| {
                Error::Validation(format!("{} must be a number of seconds", ENV_CONNECT_TIMEOUT))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(Error::Validation("connect timeout must be positive".into()));
        }
        if self.max_file_bytes > MAX_FILE_BYTES_LIMIT {
            return Err(Error::Validation(format!(
                "max_file_bytes must not exceed {} bytes",
                MAX_FILE_BYTES_LIMIT
            )));
        }
        if self.transfer_chunk_bytes == 0 {
            return Err(Error::Validation("transfer chunk size must be positive".into()));
        }
        self.kdf
            .validate()
            .map_err(|e| Error::Validation(format!("kdf settings: {}", e)))
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_secs > 0).then(|| Duration::from_secs(self.inactivity_timeout_secs))
    }
}
