use std::io;
use std::net::SocketAddr;

use fieldgate_core::{DatagramFramer, DatagramSource, Framer, Timestamp};
use log::{debug, error, warn};
use mio::event::Event;
use mio::net::UdpSocket;
use mio::{Interest, Registry};

use super::{Inbound, Transport, LISTENER};

/// Receive errors tolerated in one drain before yielding to the loop
const MAX_CONSECUTIVE_ERRORS: usize = 16;

/// How a drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drained {
    /// The socket would block
    Empty,
    /// Stopped on the error cap; datagrams may still be queued
    Yielded,
}

/// Pull datagrams until the source would block or keeps failing
fn drain_source<S: DatagramSource>(
    framer: &mut DatagramFramer,
    source: &mut S,
    inbound: &mut Vec<Inbound>,
) -> Drained {
    let mut errors = 0;

    loop {
        match framer.poll_frames(source) {
            Ok(frames) => {
                errors = 0;
                inbound.extend(frames.into_iter().map(Inbound::Frame));
            }
            Err(nb::Error::WouldBlock) => return Drained::Empty,
            Err(nb::Error::Other(e)) => {
                // ICMP errors from earlier replies surface here; the socket itself is fine
                error!("Datagram receive failed: {}", e);
                errors += 1;
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!("Yielding after {} receive errors, resuming next turn", errors);
                    return Drained::Yielded;
                }
            }
        }
    }
}

/// Datagram transport: one socket, one framer, every peer shares both
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    framer: DatagramFramer,
    /// Readiness is edge-triggered, so a drain cut short must be resumed by hand
    backlog: bool,
}

impl UdpTransport {
    /// Wrap a bound socket
    pub fn new(socket: UdpSocket) -> Self {
        Self::with_framer(socket, DatagramFramer::new())
    }

    /// Wrap a bound socket with a specific framer
    pub fn with_framer(socket: UdpSocket, framer: DatagramFramer) -> Self {
        Self {
            socket,
            framer,
            backlog: false,
        }
    }

    fn drain(&mut self, inbound: &mut Vec<Inbound>) {
        let drained = drain_source(&mut self.framer, &mut self.socket, inbound);
        self.backlog = drained == Drained::Yielded;
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.socket, LISTENER, Interest::READABLE)
    }

    fn handle_event(
        &mut self,
        _registry: &Registry,
        event: &Event,
        _now: Timestamp,
        inbound: &mut Vec<Inbound>,
    ) {
        if event.token() != LISTENER {
            debug!("Ignoring event for unknown token {:?}", event.token());
            return;
        }

        if event.is_error() {
            match self.socket.take_error() {
                Ok(Some(e)) => error!("Datagram socket error: {}", e),
                Ok(None) => {}
                Err(e) => error!("Failed to read datagram socket error: {}", e),
            }
        }

        if event.is_readable() {
            self.drain(inbound);
        }
    }

    fn has_backlog(&self) -> bool {
        self.backlog
    }

    fn resume(&mut self, _registry: &Registry, _now: Timestamp, inbound: &mut Vec<Inbound>) {
        if self.backlog {
            self.drain(inbound);
        }
    }

    fn reply(&mut self, _registry: &Registry, peer: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(bytes, peer)?;
        if sent < bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} reply bytes", sent, bytes.len()),
            ));
        }
        Ok(())
    }

    fn disconnect(&mut self, _registry: &Registry, _peer: SocketAddr) -> bool {
        false
    }

    fn connection_count(&self) -> usize {
        0
    }
}
