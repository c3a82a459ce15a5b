//! Listening socket setup
//!
//! Both transports get the same treatment before they are handed to mio:
//!
//! | Option          | Value                | Effect                                   |
//! |-----------------|----------------------|------------------------------------------|
//! | `SO_LINGER`     | on, 0 s              | close discards unsent data immediately   |
//! | `SO_REUSEADDR`  | on                   | restart without waiting out `TIME_WAIT`  |
//! | `SO_RCVTIMEO`   | configured           | bounds any blocking receive              |
//! | `O_NONBLOCK`    | on                   | reads return `WouldBlock` instead        |

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{CollectorError, Result};

/// Pending-connection queue length for stream listeners
pub const DEFAULT_BACKLOG: i32 = 128;

/// Options shared by both socket kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// `SO_RCVTIMEO`, `None` disables it
    pub receive_timeout: Option<Duration>,
    /// Listen backlog (stream only)
    pub backlog: i32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            receive_timeout: Some(Duration::from_secs(5)),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

fn configure(socket: &Socket, options: &SocketOptions) -> io::Result<()> {
    socket.set_linger(Some(Duration::ZERO))?;
    socket.set_reuse_address(true)?;
    socket.set_read_timeout(options.receive_timeout)?;
    socket.set_nonblocking(true)
}

fn open(address: SocketAddr, kind: Type, protocol: Protocol, options: &SocketOptions) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(address), kind, Some(protocol))?;
    configure(&socket, options)?;
    socket.bind(&SockAddr::from(address))?;
    Ok(socket)
}

/// Bind a non-blocking UDP socket
pub fn bind_datagram(address: SocketAddr, options: &SocketOptions) -> Result<mio::net::UdpSocket> {
    let socket = open(address, Type::DGRAM, Protocol::UDP, options)
        .map_err(|source| CollectorError::Bind { address, source })?;
    Ok(mio::net::UdpSocket::from_std(socket.into()))
}

/// Bind and listen on a non-blocking TCP socket
pub fn bind_stream(address: SocketAddr, options: &SocketOptions) -> Result<mio::net::TcpListener> {
    let socket = open(address, Type::STREAM, Protocol::TCP, options)
        .and_then(|socket| socket.listen(options.backlog).map(|()| socket))
        .map_err(|source| CollectorError::Bind { address, source })?;
    Ok(mio::net::TcpListener::from_std(socket.into()))
}

/// Apply linger-off to an accepted connection
pub fn configure_accepted(stream: &mio::net::TcpStream) -> io::Result<()> {
    socket2::SockRef::from(stream).set_linger(Some(Duration::ZERO))
}
