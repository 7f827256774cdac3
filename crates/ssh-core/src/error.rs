use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in SSH transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// SFTP subsystem error
    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    /// Connection attempt exceeded its deadline
    #[error("timed out connecting to {address} after {seconds}s")]
    Timeout { address: String, seconds: u64 },

    /// Address did not resolve to any usable socket address
    #[error("failed to resolve {address}")]
    Resolve { address: String },

    /// Authentication rejected by the server
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Host key verification failed
    #[error(transparent)]
    HostKey(#[from] HostKeyError),

    /// Remote upload failed; the partial file has been removed
    #[error("upload to {remote_path} failed: {source}")]
    Upload {
        remote_path: String,
        #[source]
        source: Box<TransportError>,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SSH transport operations.
pub type SshxResult<T> = Result<T, TransportError>;

/// Why a host key was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKeyReason {
    /// No key recorded for the hostname.
    Unknown,
    /// A recorded key exists but differs from the presented one.
    Mismatch,
}

impl HostKeyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostKeyReason::Unknown => "unknown",
            HostKeyReason::Mismatch => "mismatch",
        }
    }
}

/// Typed host-key verification failure carrying enough context for the
/// operator to repair the trust file.
#[derive(Debug)]
pub struct HostKeyError {
    pub addr: String,
    /// SHA-256 fingerprint of the presented key.
    pub fingerprint: String,
    pub trust_file_path: PathBuf,
    pub reason: HostKeyReason,
}

impl std::error::Error for HostKeyError {}

impl fmt::Display for HostKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            HostKeyReason::Unknown => write!(
                f,
                "unknown SSH host key for {} (fingerprint {}). To trust it, add it to {} or enable TOFU mode",
                self.addr,
                self.fingerprint,
                self.trust_file_path.display()
            ),
            HostKeyReason::Mismatch => write!(
                f,
                "SSH host key mismatch for {} (fingerprint {}). This may indicate a MITM attack or a rebuilt server. Update {} (or use insecure mode to bypass verification)",
                self.addr,
                self.fingerprint,
                self.trust_file_path.display()
            ),
        }
    }
}
