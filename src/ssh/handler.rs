//! SSH client handler

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use tracing::info;

/// Connection-level callbacks. Channel data is read from the channels
/// themselves, so only the host-key check is handled here.
pub struct ClientHandler {
    host: String,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    /// Every host key is accepted; the fingerprint is logged so a user can
    /// compare it out of band
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        info!(
            host = %self.host,
            key_type = server_public_key.name(),
            fingerprint = %server_public_key.fingerprint(),
            "server host key"
        );
        Ok(true)
    }
}
