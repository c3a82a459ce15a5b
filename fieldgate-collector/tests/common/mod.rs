//! Shared fixtures for collector integration tests
//!
//! Engines run on `127.0.0.1:0` with a [`ManualClock`] and a short poll
//! timeout, driven one turn at a time from the test thread. Nodes are plain
//! std sockets.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use fieldgate_collector::engine::IngestionEngine;
use fieldgate_collector::socket::{bind_datagram, bind_stream, SocketOptions};
use fieldgate_collector::{Dispatcher, TcpTransport, Transport, UdpTransport};
use fieldgate_core::{
    update_queue, IdentityNamespace, ManualClock, Message, QueueConfig, SegmentMode,
    SessionRegistry, SharedSecretPolicy, UpdateReceiver,
};
use uuid::Uuid;

/// Turns tried before a wait gives up
const MAX_TURNS: usize = 200;

/// Connection limit of stream test engines
pub const STREAM_MAX_CONNECTIONS: usize = 16;

/// Namespace shared by every test engine
pub fn namespace() -> IdentityNamespace {
    IdentityNamespace::fixed(Uuid::NAMESPACE_OID)
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// An engine plus the handles a test needs around it
pub struct Harness<T: Transport> {
    pub engine: IngestionEngine<T>,
    pub clock: ManualClock,
    pub updates: UpdateReceiver,
}

impl<T: Transport> Harness<T> {
    fn build(transport: T, customize: impl FnOnce(Dispatcher) -> Dispatcher) -> Self {
        let clock = ManualClock::new(0);
        let (tx, updates) = update_queue(QueueConfig::unbounded());
        let registry = SessionRegistry::new(namespace(), SharedSecretPolicy::Share);

        let engine = IngestionEngine::new(transport, customize(Dispatcher::new(registry, tx)))
            .unwrap()
            .with_clock(clock.clone())
            .with_poll_timeout(Duration::from_millis(10));

        Self { engine, clock, updates }
    }

    pub fn addr(&self) -> SocketAddr {
        self.engine.local_addr().unwrap()
    }

    /// Turn until `done` holds, panicking if it never does
    pub fn turn_until(&mut self, what: &str, mut done: impl FnMut(&IngestionEngine<T>) -> bool) {
        for _ in 0..MAX_TURNS {
            self.engine.turn().unwrap();
            if done(&self.engine) {
                return;
            }
        }
        panic!("gave up waiting for {}", what);
    }

    /// One turn, whatever happens
    pub fn turn(&mut self) {
        self.engine.turn().unwrap();
    }
}

/// Datagram engine with default policies
pub fn datagram() -> Harness<UdpTransport> {
    datagram_with(|d| d)
}

/// Datagram engine with adjusted dispatcher policies
pub fn datagram_with(customize: impl FnOnce(Dispatcher) -> Dispatcher) -> Harness<UdpTransport> {
    let socket = bind_datagram(loopback(), &SocketOptions::default()).unwrap();
    Harness::build(UdpTransport::new(socket), customize)
}

/// Stream engine in the given segment mode
pub fn stream(mode: SegmentMode) -> Harness<TcpTransport> {
    let listener = bind_stream(loopback(), &SocketOptions::default()).unwrap();
    Harness::build(TcpTransport::new(listener, mode, STREAM_MAX_CONNECTIONS), |d| d)
}

/// A sensing node on UDP
pub struct UdpNode {
    socket: UdpSocket,
    gateway: SocketAddr,
}

impl UdpNode {
    pub fn new(gateway: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        Self { socket, gateway }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub fn send_raw(&self, datagram: &[u8]) {
        self.socket.send_to(datagram, self.gateway).unwrap();
    }

    pub fn hello(&self, secret: &str) {
        self.send_raw(&Message::hello(secret).encode().unwrap());
    }

    pub fn data(&self, json: &str) {
        self.send_raw(&Message::data(json.as_bytes()).encode().unwrap());
    }

    /// Next reply datagram as text
    pub fn reply(&self) -> String {
        let mut buf = [0u8; 128];
        let (n, from) = self.socket.recv_from(&mut buf).unwrap();
        assert_eq!(from, self.gateway);
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }
}

/// A sensing node on TCP
pub struct TcpNode {
    stream: TcpStream,
}

impl TcpNode {
    pub fn connect(gateway: SocketAddr) -> Self {
        let stream = TcpStream::connect(gateway).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.set_nodelay(true).unwrap();
        Self { stream }
    }

    pub fn addr(&self) -> SocketAddr {
        self.stream.local_addr().unwrap()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Read exactly `len` reply bytes
    pub fn read_reply(&mut self, len: usize) -> String {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    /// Whether the gateway has closed its side
    pub fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
        }
    }
}
