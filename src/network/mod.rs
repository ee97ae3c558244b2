//! TCP transport for the tunneled PCM stream

pub mod egress;
pub mod ingress;

pub use egress::EgressWriter;
pub use ingress::{run_read_loop, IngressStats, ReadLoopEnd};

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

use crate::error::NetworkError;

/// Blocking TCP connect with the socket options the stream needs.
///
/// Nagle is disabled (a live audio stream must not be batched) and
/// keepalive enabled so a silently vanished peer eventually errors the
/// read loop. No connect or read timeout is set; `close()` forces the
/// socket shut to unblock a stalled thread.
pub fn connect(host: &str, port: u16) -> Result<TcpStream, NetworkError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?
        .next()
        .ok_or_else(|| {
            NetworkError::ConnectionFailed(format!("no address for {host}:{port}"))
        })?;

    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NetworkError::SocketConfig(e.to_string()))?;

    socket
        .set_nodelay(true)
        .map_err(|e| NetworkError::SocketConfig(e.to_string()))?;
    socket
        .set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(30)))
        .map_err(|e| NetworkError::SocketConfig(e.to_string()))?;

    socket
        .connect(&addr.into())
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

    Ok(socket.into())
}
