//! SSH transport for the SFTP provider
//!
//! Opens the SSH connection, authenticates and starts the `sftp` subsystem.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh_sftp::client::SftpSession as RusshSftpSession;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{SftpAuth, SftpSettings};
use crate::path_utils::expand_tilde;
use crate::provider::{ErrorKind, OperationResult, ProviderError};

/// Errors raised inside the russh event loop
#[derive(Error, Debug)]
pub enum SshTransportError {
    #[error("SSH protocol error: {0}")]
    Russh(#[from] russh::Error),

    #[error("Host key mismatch: expected {expected}, got {actual}")]
    HostKeyMismatch { expected: String, actual: String },
}

/// Compute SHA256 fingerprint of public key
pub fn fingerprint(key: &PublicKey) -> String {
    let key_bytes = key.public_key_bytes();
    let mut hasher = Sha256::new();
    hasher.update(&key_bytes);
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// russh callbacks: optional host key pinning
pub struct ClientHandler {
    host: String,
    port: u16,
    /// `SHA256:...` fingerprint the server key must match, if set
    pinned: Option<String>,
}

impl client::Handler for ClientHandler {
    type Error = SshTransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = fingerprint(server_public_key);
        match &self.pinned {
            Some(expected) if *expected != actual => {
                warn!(
                    "Host key for {}:{} does not match the pinned fingerprint",
                    self.host, self.port
                );
                Err(SshTransportError::HostKeyMismatch {
                    expected: expected.clone(),
                    actual,
                })
            }
            Some(_) => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            None => {
                debug!(
                    "Accepting host key for {}:{} (fingerprint: {})",
                    self.host, self.port, actual
                );
                Ok(true)
            }
        }
    }
}

/// An authenticated SSH connection with an open SFTP subsystem
pub struct SftpConnection {
    pub sftp: RusshSftpSession,
    handle: client::Handle<ClientHandler>,
}

impl SftpConnection {
    pub async fn close(&self) {
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close failed: {}", e);
        }
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect failed: {}", e);
        }
    }
}

fn transport_error(err: SshTransportError, addr: &str) -> ProviderError {
    match err {
        SshTransportError::HostKeyMismatch { .. } => {
            ProviderError::new(ErrorKind::PermissionDenied, err.to_string())
                .with_code("HostKeyMismatch")
        }
        SshTransportError::Russh(_) => {
            ProviderError::connection_failed(format!("{}: {}", addr, err))
                .with_code("SshTransport")
                .with_retryable(true)
                .with_cause(err)
        }
    }
}

fn auth_error(message: impl Into<String>) -> ProviderError {
    ProviderError::permission_denied(message).with_code("AuthenticationFailed")
}

/// Load a private key, expanding a leading `~` in its path
fn load_key(key_path: &str, passphrase: Option<&str>) -> OperationResult<russh::keys::PrivateKey> {
    let path = expand_tilde(key_path);
    russh::keys::load_secret_key(&path, passphrase)
        .map_err(|e| auth_error(format!("Failed to load key {}: {}", path.display(), e)))
}

/// Connect, authenticate and open the SFTP subsystem
pub async fn open(settings: SftpSettings) -> OperationResult<SftpConnection> {
    let addr = format!("{}:{}", settings.host, settings.port);
    info!("Connecting to SFTP server at {}", addr);

    let ssh_config = client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    };

    let handler = ClientHandler {
        host: settings.host.clone(),
        port: settings.port,
        pinned: settings.host_key_fingerprint.clone(),
    };

    let mut handle = tokio::time::timeout(
        Duration::from_secs(settings.timeout_secs),
        client::connect(Arc::new(ssh_config), (settings.host.as_str(), settings.port), handler),
    )
    .await
    .map_err(|_| {
        ProviderError::connection_failed(format!("{}: connection timed out", addr))
            .with_code("Timeout")
            .with_retryable(true)
    })?
    .map_err(|e| transport_error(e, &addr))?;

    debug!("SSH handshake completed");

    let authenticated = match &settings.auth {
        SftpAuth::Password { password } => handle
            .authenticate_password(&settings.username, password)
            .await
            .map_err(|e| auth_error(e.to_string()))?,
        SftpAuth::Key {
            key_path,
            passphrase,
        } => {
            let key = load_key(key_path, passphrase.as_deref())?;
            let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            handle
                .authenticate_publickey(&settings.username, key_with_hash)
                .await
                .map_err(|e| auth_error(e.to_string()))?
        }
    };

    if !authenticated.success() {
        return Err(auth_error("Authentication rejected by server"));
    }
    info!("SSH authentication successful for {}@{}", settings.username, addr);

    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| transport_error(e.into(), &addr))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| transport_error(e.into(), &addr))?;
    let sftp = RusshSftpSession::new(channel.into_stream())
        .await
        .map_err(|e| {
            ProviderError::new(
                ErrorKind::Unimplemented,
                format!("SFTP subsystem not available on {}: {}", addr, e),
            )
        })?;

    info!("SFTP subsystem opened on {}", addr);
    Ok(SftpConnection { sftp, handle })
}
