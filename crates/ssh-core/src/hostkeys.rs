//! Host-key trust policy backed by a known_hosts-format text file.
//!
//! The trust file holds one `hostname algorithm base64-key` record per
//! line. Accept-new (TOFU) is the default because operators repeatedly
//! connect to machines they provisioned moments earlier; a mismatch is
//! never silently accepted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{self, HashAlg, PublicKey};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{HostKeyError, HostKeyReason, SshxResult, TransportError};

/// Host-key verification policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostKeyMode {
    /// The key must already be recorded for the hostname.
    Strict,
    /// Trust the first-seen key and record it; later changes are errors.
    #[default]
    AcceptNew,
    /// Skip verification entirely. Testing only.
    InsecureIgnore,
}

/// Outcome of a trust-file lookup.
enum Lookup {
    Trusted,
    Mismatch,
    Unknown,
}

/// Line-oriented trust file with serialised appends.
pub struct TrustStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl TrustStore {
    pub fn new(path: impl Into<PathBuf>) -> TrustStore {
        TrustStore {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file and its parent directory with owner-only permissions.
    pub fn ensure_exists(&self) -> SshxResult<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
            }
        }
        if !self.path.exists() {
            fs::File::create(&self.path)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn lookup(&self, hostname: &str, presented: &PublicKey) -> SshxResult<Lookup> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Lookup::Unknown),
            Err(err) => return Err(err.into()),
        };

        let mut seen_host = false;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(host_field) = tokens.next() else {
                continue;
            };
            if !host_field.split(',').any(|h| h == hostname) {
                continue;
            }
            seen_host = true;
            if tokens.any(|token| {
                keys::parse_public_key_base64(token)
                    .map(|recorded| &recorded == presented)
                    .unwrap_or(false)
            }) {
                return Ok(Lookup::Trusted);
            }
        }

        if seen_host {
            Ok(Lookup::Mismatch)
        } else {
            Ok(Lookup::Unknown)
        }
    }

    /// Append a record. Appends are serialised so concurrent connects
    /// cannot interleave partial lines.
    async fn append(&self, hostname: &str, key: &PublicKey) -> SshxResult<()> {
        let _guard = self.append_lock.lock().await;
        self.ensure_exists()?;
        let openssh = key
            .to_openssh()
            .map_err(|e| TransportError::Other(format!("encode host key: {e}")))?;
        let mut file = fs::OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{hostname} {openssh}")?;
        Ok(())
    }
}

/// Applies a [`HostKeyMode`] to keys presented during the SSH handshake.
pub struct HostKeyVerifier {
    store: Arc<TrustStore>,
    mode: HostKeyMode,
    addr: String,
}

impl HostKeyVerifier {
    pub fn new(store: Arc<TrustStore>, mode: HostKeyMode, addr: impl Into<String>) -> Self {
        HostKeyVerifier {
            store,
            mode,
            addr: addr.into(),
        }
    }

    pub async fn check(&self, key: &PublicKey) -> SshxResult<bool> {
        if matches!(self.mode, HostKeyMode::InsecureIgnore) {
            return Ok(true);
        }

        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
        match self.store.lookup(&self.addr, key)? {
            Lookup::Trusted => {
                info!("host key for {} verified against trust file", self.addr);
                Ok(true)
            }
            Lookup::Mismatch => Err(HostKeyError {
                addr: self.addr.clone(),
                fingerprint,
                trust_file_path: self.store.path().to_path_buf(),
                reason: HostKeyReason::Mismatch,
            }
            .into()),
            Lookup::Unknown => match self.mode {
                HostKeyMode::AcceptNew => {
                    self.store.append(&self.addr, key).await?;
                    info!(
                        "trusting new host key for {} (fingerprint {})",
                        self.addr, fingerprint
                    );
                    Ok(true)
                }
                _ => Err(HostKeyError {
                    addr: self.addr.clone(),
                    fingerprint,
                    trust_file_path: self.store.path().to_path_buf(),
                    reason: HostKeyReason::Unknown,
                }
                .into()),
            },
        }
    }
}

/// russh client handler delegating server-key checks to the verifier.
#[derive(Clone)]
pub struct ClientHandler {
    verifier: Arc<HostKeyVerifier>,
}

impl ClientHandler {
    pub fn new(verifier: HostKeyVerifier) -> Self {
        ClientHandler {
            verifier: Arc::new(verifier),
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = TransportError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let verifier = Arc::clone(&self.verifier);
        let key = server_public_key.clone();
        async move { verifier.check(&key).await }
    }
}

#[cfg(test)]
#[path = "hostkeys_tests.rs"]
mod tests;
