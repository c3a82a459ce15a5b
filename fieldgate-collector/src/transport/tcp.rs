use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr};

use fieldgate_core::framing::DEFAULT_MAX_BUFFER;
use fieldgate_core::{FrameError, Framer, IdleThreshold, SegmentMode, StreamFramer, Timestamp};
use log::{debug, error, info, warn};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};

use super::{Inbound, Transport, LISTENER};
use crate::socket;

/// Reply bytes a connection may leave unread before it is dropped
pub const DEFAULT_MAX_PENDING: usize = DEFAULT_MAX_BUFFER;

/// One accepted connection
#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    framer: StreamFramer,
    /// Reply bytes the socket has not taken yet
    pending: Vec<u8>,
    wants_write: bool,
    /// Accept time, then the time of the latest read
    last_activity: Timestamp,
}

impl Connection {
    /// Pull frames until the stream would block or ends
    fn drain(&mut self, inbound: &mut Vec<Inbound>) -> Result<(), FrameError> {
        loop {
            match self.framer.poll_frames(&mut self.stream) {
                Ok(frames) => inbound.extend(frames.into_iter().map(Inbound::Frame)),
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    /// Write as much of `pending` as the socket takes, then fix up interest
    fn flush(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let wants_write = !self.pending.is_empty();
        if wants_write != self.wants_write {
            let interest = if wants_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            registry.reregister(&mut self.stream, token, interest)?;
            self.wants_write = wants_write;
        }
        Ok(())
    }
}

/// Stream transport: a listener plus one framed connection per peer
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    mode: SegmentMode,
    max_connections: usize,
    max_pending: usize,
    connections: HashMap<Token, Connection>,
    by_peer: HashMap<SocketAddr, Token>,
    next_token: usize,
}

impl TcpTransport {
    /// Wrap a listening socket
    pub fn new(listener: TcpListener, mode: SegmentMode, max_connections: usize) -> Self {
        Self {
            listener,
            mode,
            max_connections: max_connections.max(1),
            max_pending: DEFAULT_MAX_PENDING,
            connections: HashMap::new(),
            by_peer: HashMap::new(),
            next_token: LISTENER.0 + 1,
        }
    }

    /// Cap the reply bytes a peer may leave unread
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Segment interpretation for new connections
    pub fn mode(&self) -> SegmentMode {
        self.mode
    }

    fn accept(&mut self, registry: &Registry, now: Timestamp) {
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    return;
                }
            };

            if self.connections.len() >= self.max_connections {
                warn!("{}: refused, {} connections open", peer, self.connections.len());
                continue;
            }

            if let Err(e) = socket::configure_accepted(&stream) {
                warn!("{}: failed to disable linger: {}", peer, e);
            }

            let token = Token(self.next_token);
            self.next_token += 1;
            if let Err(e) = registry.register(&mut stream, token, Interest::READABLE) {
                error!("{}: failed to register connection: {}", peer, e);
                continue;
            }

            info!("{}: connected", peer);
            self.by_peer.insert(peer, token);
            self.connections.insert(
                token,
                Connection {
                    stream,
                    peer,
                    framer: StreamFramer::new(peer, self.mode),
                    pending: Vec::new(),
                    wants_write: false,
                    last_activity: now,
                },
            );
        }
    }

    fn service(&mut self, registry: &Registry, event: &Event, now: Timestamp, inbound: &mut Vec<Inbound>) {
        let token = event.token();
        let Some(conn) = self.connections.get_mut(&token) else {
            debug!("Event for closed connection {:?}", token);
            return;
        };
        let peer = conn.peer;

        let mut failure = None;
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            conn.last_activity = now;
            failure = conn.drain(inbound).err();
        }
        if failure.is_none() && event.is_error() {
            let e = match conn.stream.take_error() {
                Ok(Some(e)) => e,
                Ok(None) => io::Error::new(io::ErrorKind::Other, "error readiness"),
                Err(e) => e,
            };
            failure = Some(FrameError::Io(e));
        }
        if failure.is_none() && event.is_writable() {
            failure = conn.flush(registry, token).err().map(FrameError::Io);
        }

        if let Some(reason) = failure {
            match &reason {
                FrameError::Disconnected => info!("{}: disconnected", peer),
                other => warn!("{}: closing connection: {}", peer, other),
            }
            self.close(registry, token);
            inbound.push(Inbound::Closed { peer, reason });
        }
    }

    fn close(&mut self, registry: &Registry, token: Token) -> Option<SocketAddr> {
        let mut conn = self.connections.remove(&token)?;
        self.by_peer.remove(&conn.peer);
        if let Err(e) = registry.deregister(&mut conn.stream) {
            debug!("{}: deregister failed: {}", conn.peer, e);
        }
        // Already-closed sockets report NotConnected here
        let _ = conn.stream.shutdown(Shutdown::Both);
        Some(conn.peer)
    }
}

impl Transport for TcpTransport {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.listener, LISTENER, Interest::READABLE)
    }

    fn handle_event(
        &mut self,
        registry: &Registry,
        event: &Event,
        now: Timestamp,
        inbound: &mut Vec<Inbound>,
    ) {
        if event.token() == LISTENER {
            self.accept(registry, now);
        } else {
            self.service(registry, event, now, inbound);
        }
    }

    fn reply(&mut self, registry: &Registry, peer: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        let token = *self
            .by_peer
            .get(&peer)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, format!("no connection for {}", peer)))?;
        let conn = self
            .connections
            .get_mut(&token)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        if conn.pending.len() + bytes.len() > self.max_pending {
            let backlog = conn.pending.len();
            warn!("{}: {} reply bytes unread, closing connection", peer, backlog);
            self.close(registry, token);
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                format!("{} reply bytes unread", backlog),
            ));
        }

        conn.pending.extend_from_slice(bytes);
        conn.flush(registry, token)
    }

    fn disconnect(&mut self, registry: &Registry, peer: SocketAddr) -> bool {
        match self.by_peer.get(&peer).copied() {
            Some(token) => self.close(registry, token).is_some(),
            None => false,
        }
    }

    fn close_idle(
        &mut self,
        registry: &Registry,
        now: Timestamp,
        idle: IdleThreshold,
        has_session: &dyn Fn(SocketAddr) -> bool,
    ) -> Vec<SocketAddr> {
        let stale: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| idle.is_idle(conn.last_activity, now) && !has_session(conn.peer))
            .map(|(token, _)| *token)
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for token in stale {
            if let Some(peer) = self.close(registry, token) {
                info!("{}: closed, no session after {} idle minute(s)", peer, idle.minutes());
                closed.push(peer);
            }
        }
        closed
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
