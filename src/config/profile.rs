//! Server profile structures

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How to authenticate against a server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    Password {
        password: String,
    },
    /// OpenSSH/PEM private key text, optionally passphrase-protected
    PrivateKey {
        key: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthMethod::Password { .. } => AuthKind::Password,
            AuthMethod::PrivateKey { .. } => AuthKind::Key,
        }
    }
}

// Secrets must never reach logs
impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password { .. } => f.write_str("Password([REDACTED])"),
            AuthMethod::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("key", &"[REDACTED]")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Password,
    Key,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Socks5,
    Http,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Username/password pair, only when both are present and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

/// A saved remote server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Empty until the store assigns one
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Id of another saved profile to tunnel through
    #[serde(default)]
    pub jump_host: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ServerProfile {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: AuthMethod,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            host: host.into(),
            port,
            username: username.into(),
            auth,
            proxy: None,
            jump_host: None,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_jump_host(mut self, jump_host_id: impl Into<String>) -> Self {
        self.jump_host = Some(jump_host_id.into());
        self
    }

    /// user@host:port, with the port left out when it is 22
    pub fn connection_string(&self) -> String {
        if self.port == 22 {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Validation("host must not be empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Validation("username must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Validation("port must be between 1 and 65535".into()));
        }

        if let AuthMethod::PrivateKey { key, .. } = &self.auth {
            if key.trim().is_empty() {
                return Err(Error::Validation("private key must not be empty".into()));
            }
        }

        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(Error::Validation("proxy host must not be empty".into()));
            }
            if proxy.port == 0 {
                return Err(Error::Validation("proxy port must be between 1 and 65535".into()));
            }
        }

        if let Some(jump) = &self.jump_host {
            if !self.id.is_empty() && jump == &self.id {
                return Err(Error::Validation("a server cannot be its own jump host".into()));
            }
        }

        Ok(())
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary::from(self)
    }
}

/// What a listing shows: no secret material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_kind: AuthKind,
    pub has_proxy: bool,
    pub jump_host: Option<String>,
    pub notes: Option<String>,
}

impl From<&ServerProfile> for ProfileSummary {
    fn from(profile: &ServerProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            auth_kind: profile.auth.kind(),
            has_proxy: profile.proxy.is_some(),
            jump_host: profile.jump_host.clone(),
            notes: profile.notes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerProfile {
        ServerProfile::new(
            "web",
            "example.com",
            22,
            "deploy",
            AuthMethod::Password {
                password: "s3cret".into(),
            },
        )
    }

    #[test]
    fn test_validate_accepts_complete_profile() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut p = sample();
        p.name = "  ".into();
        assert!(matches!(p.validate(), Err(Error::Validation(_))));

        let mut p = sample();
        p.host.clear();
        assert!(p.validate().is_err());

        let mut p = sample();
        p.username.clear();
        assert!(p.validate().is_err());

        let mut p = sample();
        p.port = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_validate_checks_proxy_and_jump() {
        let p = sample().with_proxy(ProxyConfig {
            kind: ProxyKind::Http,
            host: String::new(),
            port: 8080,
            username: None,
            password: None,
        });
        assert!(p.validate().is_err());

        let mut p = sample().with_jump_host("abc");
        p.id = "abc".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_summary_has_no_secrets() {
        let summary = sample().summary();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("s3cret"));
        assert_eq!(summary.auth_kind, AuthKind::Password);
        assert!(!summary.has_proxy);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let printed = format!("{:?}", sample());
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_connection_string() {
        assert_eq!(sample().connection_string(), "deploy@example.com");

        let mut p = sample();
        p.port = 2222;
        assert_eq!(p.connection_string(), "deploy@example.com:2222");
    }

    #[test]
    fn test_proxy_credentials_need_username() {
        let mut proxy = ProxyConfig {
            kind: ProxyKind::Socks5,
            host: "proxy".into(),
            port: 1080,
            username: Some(String::new()),
            password: Some("pw".into()),
        };
        assert!(proxy.credentials().is_none());

        proxy.username = Some("me".into());
        assert_eq!(proxy.credentials(), Some(("me", "pw")));
    }
}
