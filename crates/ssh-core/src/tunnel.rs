//! Local SOCKS5 proxy that relays every accepted connection through the
//! SSH transport's dial capability.
//!
//! RFC 1928 subset: NO-AUTHENTICATION only, CONNECT only. Domain names are
//! forwarded as-is so the remote resolver decides.

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, copy_bidirectional};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dial::DialSession;
use crate::error::{SshxResult, TransportError};
use crate::transport::{ConnectOptions, SshClient, Target};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;
const REP_NOT_ALLOWED: u8 = 0x02;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_ATYP_UNSUPPORTED: u8 = 0x08;

/// Connect to the target over SSH and serve a local SOCKS5 proxy on
/// `local_addr` until `cancel` fires. The stealth path: zero footprint on
/// the remote host.
pub async fn run(
    target: &Target,
    opts: &ConnectOptions,
    local_addr: &str,
    cancel: CancellationToken,
) -> SshxResult<()> {
    let client = SshClient::connect(target, opts).await?;

    let listener = TcpListener::bind(local_addr).await?;
    info!(bind = %listener.local_addr()?, "stealth tunnel active");
    info!(host = %target.host, "all traffic is routed through SSH");

    let served = serve(listener, client.clone(), cancel).await;
    client.close().await;
    served
}

/// Accept loop. Each connection gets its own task owning both stream ends;
/// cancellation stops accepting and drains in-flight handlers.
pub async fn serve<S>(
    listener: TcpListener,
    session: S,
    cancel: CancellationToken,
) -> SshxResult<()>
where
    S: DialSession,
{
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let session = session.clone();
                        handlers.spawn(async move {
                            if let Err(err) = handle_socks_client(stream, session).await {
                                warn!(?err, "socks client failed");
                            }
                        });
                    }
                    Err(err) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        return Err(TransportError::Io(err));
                    }
                }
            }
        }
    }
    drop(listener);
    while handlers.join_next().await.is_some() {}
    info!("tunnel closed");
    Ok(())
}

/// Process a single SOCKS5 connection against the injected dial.
pub async fn handle_socks_client<S>(mut stream: TcpStream, session: S) -> SshxResult<()>
where
    S: DialSession,
{
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(TransportError::Other("unsupported SOCKS version".into()));
    }
    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_NONE) {
        stream
            .write_all(&[SOCKS_VERSION, AUTH_NO_ACCEPTABLE])
            .await?;
        return Err(TransportError::Other(
            "client does not support no-auth".into(),
        ));
    }
    stream.write_all(&[SOCKS_VERSION, AUTH_NONE]).await?;

    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != SOCKS_VERSION {
        return Err(TransportError::Other("bad SOCKS version in request".into()));
    }
    if request[1] != CMD_CONNECT {
        send_reply(&mut stream, REP_NOT_ALLOWED).await?;
        return Err(TransportError::Other(format!(
            "unsupported command: {}",
            request[1]
        )));
    }

    let target_host = match request[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv4Addr::from(addr).to_string()
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv6Addr::from(addr).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        other => {
            send_reply(&mut stream, REP_ATYP_UNSUPPORTED).await?;
            return Err(TransportError::Other(format!(
                "unsupported address type: {other}"
            )));
        }
    };
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let target_port = u16::from_be_bytes(port_buf);

    let origin = stream.peer_addr().ok();
    let origin_host = origin
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let origin_port = origin.map(|a| a.port()).unwrap_or(0);

    let mut remote = match session
        .open_direct_tcpip(target_host.clone(), target_port, origin_host, origin_port)
        .await
    {
        Ok(remote) => remote,
        Err(err) => {
            warn!(?err, target = %format!("{target_host}:{target_port}"), "failed to dial socks target");
            send_reply(&mut stream, REP_HOST_UNREACHABLE).await?;
            return Ok(());
        }
    };

    send_reply(&mut stream, REP_SUCCESS).await?;

    let copy_result = copy_bidirectional(&mut stream, remote.as_mut()).await;
    let _ = remote.as_mut().shutdown().await;
    let _ = stream.shutdown().await;
    copy_result?;
    Ok(())
}

// +----+-----+-------+------+----------+----------+
// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
// +----+-----+-------+------+----------+----------+
// ATYP is always IPv4; the SSH channel carries no local socket address, so
// the bind fields are zero.
async fn send_reply<W>(stream: &mut W, rep: u8) -> SshxResult<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut reply = [0u8; 10];
    reply[0] = SOCKS_VERSION;
    reply[1] = rep;
    reply[3] = ATYP_IPV4;
    stream.write_all(&reply).await?;
    Ok(())
}
