//! SSH transport: bounded connect, password auth, remote exec with
//! combined output, SFTP upload, and the direct-tcpip dial capability.

use std::env;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::dial::{DialSession, DialStream};
use crate::error::{SshxResult, TransportError};
use crate::hostkeys::{ClientHandler, HostKeyMode, HostKeyVerifier, TrustStore};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Connection coordinates for one remote host.
#[derive(Clone)]
pub struct Target {
    pub host: String,
    /// 0 defaults to 22.
    pub port: u16,
    pub user: String,
    pub password: SecretString,
}

/// Host-key policy plus the trust-file location.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub trust_file: PathBuf,
    pub host_key_mode: HostKeyMode,
}

impl ConnectOptions {
    /// Resolve options from the environment, falling back to
    /// `~/.beammeup/known_hosts` and accept-new.
    pub fn from_env() -> SshxResult<ConnectOptions> {
        let mut mode = HostKeyMode::AcceptNew;
        if env_true("BEAMMEUP_STRICT_HOST_KEY") {
            mode = HostKeyMode::Strict;
        }
        if env_true("BEAMMEUP_INSECURE_IGNORE_HOST_KEY") {
            mode = HostKeyMode::InsecureIgnore;
        }

        let trust_file = match env::var("BEAMMEUP_SSH_KNOWN_HOSTS") {
            Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
            _ => {
                let home = env::var("HOME")
                    .map_err(|_| TransportError::Other("cannot resolve home directory".into()))?;
                PathBuf::from(home).join(".beammeup").join("known_hosts")
            }
        };
        Ok(ConnectOptions {
            trust_file,
            host_key_mode: mode,
        })
    }
}

/// True iff the variable is set to `1|true|yes|y|on` (case-insensitive).
pub fn env_true(key: &str) -> bool {
    matches!(
        env::var(key)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Combined output of one remote command.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    /// Interleaved stdout + stderr bytes, lossily decoded.
    pub output: String,
    /// None when the channel closed without reporting a status.
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        matches!(self.exit_status, None | Some(0))
    }
}

/// An authenticated SSH connection to one target.
#[derive(Clone)]
pub struct SshClient {
    handle: Arc<Handle<ClientHandler>>,
}

impl SshClient {
    /// Dial, verify the host key per policy, and authenticate by password.
    /// The whole sequence is bounded by a 20 second deadline.
    pub async fn connect(target: &Target, opts: &ConnectOptions) -> SshxResult<SshClient> {
        let port = if target.port == 0 { 22 } else { target.port };
        let address = format!("{}:{}", target.host, port);

        let socket_addr = address
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve {
                address: address.clone(),
            })?
            .next()
            .ok_or_else(|| TransportError::Resolve {
                address: address.clone(),
            })?;

        info!("connecting to {address}");
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| TransportError::Timeout {
                address: address.clone(),
                seconds: CONNECT_TIMEOUT.as_secs(),
            })??;
        stream.set_nodelay(true).ok();

        let store = Arc::new(TrustStore::new(&opts.trust_file));
        if !matches!(opts.host_key_mode, HostKeyMode::InsecureIgnore) {
            store.ensure_exists()?;
        }
        let verifier = HostKeyVerifier::new(store, opts.host_key_mode, target.host.clone());
        let handler = ClientHandler::new(verifier);

        let config = Arc::new(client::Config {
            nodelay: true,
            inactivity_timeout: None,
            ..Default::default()
        });
        let mut handle = timeout(CONNECT_TIMEOUT, client::connect_stream(config, stream, handler))
            .await
            .map_err(|_| TransportError::Timeout {
                address: address.clone(),
                seconds: CONNECT_TIMEOUT.as_secs(),
            })??;

        let auth = handle
            .authenticate_password(
                target.user.clone(),
                target.password.expose_secret().to_string(),
            )
            .await?;
        match auth {
            AuthResult::Success => {}
            AuthResult::Failure {
                partial_success, ..
            } => {
                let detail = if partial_success {
                    "partial authentication, additional methods required"
                } else {
                    "password rejected by server"
                };
                return Err(TransportError::Auth(detail.to_string()));
            }
        }
        debug!("authenticated as {}", target.user);

        Ok(SshClient {
            handle: Arc::new(handle),
        })
    }

    /// Execute a command and collect combined stdout + stderr.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_status`],
    /// not as an error; callers decide what a failure means.
    pub async fn run_combined(&self, command: &str) -> SshxResult<CommandOutput> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command.as_bytes()).await?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, .. } => output.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_status,
        })
    }

    /// Upload a byte buffer to `remote_path` with the given mode.
    ///
    /// A failed transfer removes the partial remote file rather than
    /// leaving truncated content behind.
    pub async fn upload(&self, content: &[u8], remote_path: &str, mode: u32) -> SshxResult<()> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;

        let result = write_remote(&sftp, content, remote_path, mode).await;
        if result.is_err() {
            let _ = sftp.remove_file(remote_path).await;
        }
        let _ = sftp.close().await;
        result.map_err(|source| TransportError::Upload {
            remote_path: remote_path.to_string(),
            source: Box::new(source),
        })
    }

    /// Disconnect and release all remote sessions.
    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await;
    }
}

async fn write_remote(
    sftp: &SftpSession,
    content: &[u8],
    remote_path: &str,
    mode: u32,
) -> SshxResult<()> {
    let mut file = sftp.create(remote_path).await?;
    file.write_all(content).await?;
    file.shutdown().await?;
    sftp.set_metadata(
        remote_path,
        FileAttributes {
            permissions: Some(mode),
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

#[async_trait]
impl DialSession for SshClient {
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> SshxResult<DialStream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                target_host,
                target_port.into(),
                origin_host,
                origin_port.into(),
            )
            .await?;
        Ok(Box::new(channel.into_stream()))
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
