pub mod dial;
pub mod error;
pub mod hostkeys;
pub mod transport;
pub mod tunnel;

pub use dial::{DialSession, DialStream};
pub use error::{HostKeyError, HostKeyReason, SshxResult, TransportError};
pub use hostkeys::{HostKeyMode, TrustStore};
pub use transport::{CommandOutput, ConnectOptions, SshClient, Target};
