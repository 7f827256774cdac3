//! Injectable dial seam between the SOCKS5 tunnel and the SSH transport.
//!
//! The tunnel handler takes a [`DialSession`] rather than knowing about
//! SSH, so it is unit-testable against in-process streams and open to
//! future transports.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SshxResult;

/// Trait alias for streams usable as a dialled endpoint.
pub trait DialStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DialStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed bidirectional byte stream to a dialled destination.
pub type DialStream = Box<dyn DialStreamIo>;

/// A session capable of opening TCP connections from the remote side.
#[async_trait]
pub trait DialSession: Clone + Send + Sync + 'static {
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> SshxResult<DialStream>;
}
