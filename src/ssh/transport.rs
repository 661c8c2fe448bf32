//! Connection establishment: dial, optional proxy or jump host, SSH handshake
//! and user authentication

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Msg};
use russh::{Channel, Disconnect};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::handler::ClientHandler;
use crate::config::{AuthMethod, ServerProfile, Settings};
use crate::error::{Error, Result};
use crate::proxy;

/// Connection-related knobs taken from [`Settings`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
    pub term: String,
}

impl ConnectOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            keepalive_interval: settings.keepalive_interval(),
            inactivity_timeout: settings.inactivity_timeout(),
            term: settings.term.clone(),
        }
    }

    fn client_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: self.inactivity_timeout,
            keepalive_interval: self.keepalive_interval,
            keepalive_max: 3,
            ..Default::default()
        })
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// An authenticated SSH connection. When the target was reached through a
/// jump host, the jump connection is kept alive alongside it.
pub struct Transport {
    handle: client::Handle<ClientHandler>,
    jump: Option<client::Handle<ClientHandler>>,
    target: String,
}

impl Transport {
    /// Dial, handshake and authenticate, all within `options.connect_timeout`
    pub async fn connect(
        profile: &ServerProfile,
        jump: Option<&ServerProfile>,
        options: &ConnectOptions,
    ) -> Result<Self> {
        let limit = options.connect_timeout;

        timeout(limit, Self::establish(profile, jump, options))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "timed out after {}s connecting to {}",
                    limit.as_secs(),
                    profile.connection_string()
                ))
            })?
    }

    async fn establish(
        profile: &ServerProfile,
        jump: Option<&ServerProfile>,
        options: &ConnectOptions,
    ) -> Result<Self> {
        let config = options.client_config();
        let handler = ClientHandler::new(profile.host.clone());

        let (mut handle, jump) = match jump {
            Some(jump_profile) => {
                info!(
                    target = %profile.connection_string(),
                    via = %jump_profile.connection_string(),
                    "connecting through jump host"
                );

                let jump_stream = dial(jump_profile, options).await?;
                let mut jump_handle = client::connect_stream(
                    config.clone(),
                    jump_stream,
                    ClientHandler::new(jump_profile.host.clone()),
                )
                .await?;
                authenticate(&mut jump_handle, jump_profile).await?;

                let tunnel = jump_handle
                    .channel_open_direct_tcpip(profile.host.clone(), u32::from(profile.port), "127.0.0.1", 0)
                    .await
                    .map_err(|e| {
                        Error::Connection(format!(
                            "jump host {} could not reach {}:{}: {}",
                            jump_profile.name, profile.host, profile.port, e
                        ))
                    })?;

                let handle = client::connect_stream(config, tunnel.into_stream(), handler).await?;
                (handle, Some(jump_handle))
            }
            None => {
                let stream = dial(profile, options).await?;
                let handle = client::connect_stream(config, stream, handler).await?;
                (handle, None)
            }
        };

        authenticate(&mut handle, profile).await?;
        info!(target = %profile.connection_string(), "authenticated");

        Ok(Self {
            handle,
            jump,
            target: profile.connection_string(),
        })
    }

    pub async fn open_session_channel(&self) -> Result<Channel<Msg>> {
        Ok(self.handle.channel_open_session().await?)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Graceful SSH disconnect; failures are logged and otherwise ignored
    pub async fn disconnect(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(target = %self.target, error = %e, "disconnect");
        }

        if let Some(jump) = self.jump {
            if let Err(e) = jump.disconnect(Disconnect::ByApplication, "", "en").await {
                debug!(target = %self.target, error = %e, "jump host disconnect");
            }
        }
    }
}

/// TCP connection to the profile's host, directly or through its proxy
async fn dial(profile: &ServerProfile, options: &ConnectOptions) -> Result<TcpStream> {
    let stream = match &profile.proxy {
        Some(proxy_config) => {
            proxy::connect(proxy_config, &profile.host, profile.port, options.connect_timeout).await?
        }
        None => {
            debug!(target = %format!("{}:{}", profile.host, profile.port), "dialing");
            TcpStream::connect((profile.host.as_str(), profile.port))
                .await
                .map_err(|e| dial_error(profile, e))?
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY");
    }
    Ok(stream)
}

fn dial_error(profile: &ServerProfile, e: std::io::Error) -> Error {
    let target = format!("{}:{}", profile.host, profile.port);
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Connection(format!("connection refused by {}", target))
        }
        _ => Error::Connection(format!("host unreachable {}: {}", target, e)),
    }
}

async fn authenticate(handle: &mut client::Handle<ClientHandler>, profile: &ServerProfile) -> Result<()> {
    let accepted = match &profile.auth {
        AuthMethod::Password { password } => {
            handle
                .authenticate_password(profile.username.as_str(), password.as_str())
                .await?
        }
        AuthMethod::PrivateKey { key, passphrase } => {
            let passphrase = passphrase.as_deref().filter(|p| !p.is_empty());
            let key_pair = russh_keys::decode_secret_key(key, passphrase)?;
            handle
                .authenticate_publickey(profile.username.as_str(), Arc::new(key_pair))
                .await?
        }
    };

    if accepted {
        Ok(())
    } else {
        let what = match profile.auth {
            AuthMethod::Password { .. } => "invalid username or password",
            AuthMethod::PrivateKey { .. } => "server rejected the private key",
        };
        Err(Error::Authentication(format!("{} ({})", what, profile.connection_string())))
    }
}
