use thiserror::Error;

use ssh_core::TransportError;

/// Errors that can occur while orchestrating a hangar operation.
#[derive(Error, Debug)]
pub enum HangarError {
    /// SSH dial, auth, host-key, or channel failure
    #[error("ssh connect: {0}")]
    Transport(#[from] TransportError),

    /// The remote agent exited non-zero without its success marker.
    /// `detail` is sanitised output: every `BM_` line stripped, bounded
    /// to a tail.
    #[error("remote command failed (mode={mode})\n{detail}")]
    RemoteRun { mode: String, detail: String },

    /// The remote refused to touch a foreign Squid configuration
    #[error(
        "{message}\nhint: pass --http-mode sidecar to install an isolated HTTP proxy, or use --protocol socks5"
    )]
    Conflict { message: String },

    /// Inventory succeeded but produced no `BM_` keys
    #[error("inventory returned no BM output\n{raw}")]
    InventoryEmpty { raw: String },

    /// Ship profile is malformed or missing required fields
    #[error("{0}")]
    InvalidShip(String),

    /// Malformed or conflicting request inputs; maps to exit code 2
    #[error("{0}")]
    Usage(String),

    /// Operator aborted the request
    #[error("cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for hangar operations.
pub type HangarResult<T> = Result<T, HangarError>;
