//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use crate::error::NetworkError;

/// Options for [`create_socket`]
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub bind_addr: SocketAddr,
    /// Bounds every blocking receive so the receive task can observe a stop flag
    pub read_timeout: Duration,
    pub broadcast: bool,
    pub reuse_address: bool,
    /// Small buffers keep queued audio from going stale
    pub recv_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
}

impl SocketOptions {
    /// Bind on every interface at `port`
    pub fn any(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
            read_timeout: Duration::from_millis(100),
            broadcast: false,
            reuse_address: true,
            recv_buffer_size: Some(64 * 1024),
            send_buffer_size: Some(64 * 1024),
        }
    }
}

/// Create and bind a UDP socket with the given options
pub fn create_socket(options: &SocketOptions) -> Result<std::net::UdpSocket, NetworkError> {
    let domain = match options.bind_addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(format!("socket(): {}", e)))?;

    if options.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(format!("SO_REUSEADDR: {}", e)))?;
    }

    if options.broadcast {
        socket
            .set_broadcast(true)
            .map_err(|e| NetworkError::BindFailed(format!("SO_BROADCAST: {}", e)))?;
    }

    if let Some(size) = options.recv_buffer_size {
        // Not fatal: the kernel may clamp or refuse
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::debug!("Could not set receive buffer size: {}", e);
        }
    }

    if let Some(size) = options.send_buffer_size {
        if let Err(e) = socket.set_send_buffer_size(size) {
            tracing::debug!("Could not set send buffer size: {}", e);
        }
    }

    socket
        .set_read_timeout(Some(options.read_timeout))
        .map_err(|e| NetworkError::BindFailed(format!("SO_RCVTIMEO: {}", e)))?;

    socket
        .bind(&options.bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", options.bind_addr, e)))?;

    Ok(socket.into())
}
