//! Socket transports
//!
//! A [`Transport`] owns the mio sources for one listening address and turns
//! readiness events into [`Inbound`] items. It never looks at what a message
//! means; that is the dispatcher's job.
//!
//! | Transport        | Sources                         | Framer            | Peer key        |
//! |------------------|---------------------------------|-------------------|-----------------|
//! | [`UdpTransport`] | one UDP socket                  | `DatagramFramer`  | source address  |
//! | [`TcpTransport`] | listener + one stream per peer  | `StreamFramer`    | remote address  |
//!
//! Readiness is edge-triggered, so every handler drains its source until it
//! would block. A transport that had to stop early reports a backlog and is
//! resumed on the next turn without waiting for another event.

use std::io;
use std::net::SocketAddr;

use fieldgate_core::{Frame, FrameError, IdleThreshold, Timestamp};
use mio::event::Event;
use mio::{Registry, Token};

mod tcp;
mod udp;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Token of the listening (or only) socket
pub const LISTENER: Token = Token(0);

/// Something a transport wants the engine to know about
#[derive(Debug)]
pub enum Inbound {
    /// A message, or a malformed one, from a peer
    Frame(Frame),
    /// A stream peer is gone; its session ends with it
    Closed {
        /// Remote address of the closed connection
        peer: SocketAddr,
        /// Why it closed
        reason: FrameError,
    },
}

/// Readiness-driven socket ownership
pub trait Transport {
    /// Bound address
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Register the listening source
    fn register(&mut self, registry: &Registry) -> io::Result<()>;

    /// Handle one readiness event, appending what came of it to `inbound`
    fn handle_event(
        &mut self,
        registry: &Registry,
        event: &Event,
        now: Timestamp,
        inbound: &mut Vec<Inbound>,
    );

    /// Whether a previous drain stopped before the source would block
    fn has_backlog(&self) -> bool {
        false
    }

    /// Continue a drain cut short by [`has_backlog`](Transport::has_backlog)
    fn resume(&mut self, _registry: &Registry, _now: Timestamp, _inbound: &mut Vec<Inbound>) {}

    /// Send raw reply bytes to `peer`
    fn reply(&mut self, registry: &Registry, peer: SocketAddr, bytes: &[u8]) -> io::Result<()>;

    /// Drop whatever connection state belongs to `peer`
    ///
    /// Returns `true` if a connection was closed.
    fn disconnect(&mut self, registry: &Registry, peer: SocketAddr) -> bool;

    /// Close connections idle past `idle` that `has_session` does not claim
    ///
    /// Session-owned connections are left to session eviction. Returns the
    /// peers that were closed.
    fn close_idle(
        &mut self,
        _registry: &Registry,
        _now: Timestamp,
        _idle: IdleThreshold,
        _has_session: &dyn Fn(SocketAddr) -> bool,
    ) -> Vec<SocketAddr> {
        Vec::new()
    }

    /// Open connections (always 0 for datagram transports)
    fn connection_count(&self) -> usize;
}
