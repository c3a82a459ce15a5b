//! Ingestion Engine
//!
//! One thread, one [`mio::Poll`], one loop:
//!
//! ```text
//! ┌──────────────────────────── turn() ────────────────────────────┐
//! │ 1. poll (bounded wait)                                         │
//! │ 2. transport.handle_event ──► Inbound frames / closes          │
//! │ 3. dispatcher.dispatch ──► reply | enqueue | ignore | drop     │
//! │ 4. registry.evict_idle ──► transport.disconnect                │
//! │ 5. transport.close_idle ──► connections that never registered  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is generic over the [`Transport`], so the same loop serves
//! datagram and stream listeners. Nothing a peer sends can end the loop; only
//! a failing readiness poll does.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use fieldgate_collector::engine::IngestionEngine;
//! use fieldgate_collector::socket::{bind_datagram, SocketOptions};
//! use fieldgate_collector::{Dispatcher, UdpTransport};
//! use fieldgate_core::{update_queue, IdentityNamespace, QueueConfig, SessionRegistry, SharedSecretPolicy};
//!
//! let socket = bind_datagram("0.0.0.0:8000".parse().unwrap(), &SocketOptions::default())?;
//! let (tx, _rx) = update_queue(QueueConfig::unbounded());
//! let registry = SessionRegistry::new(IdentityNamespace::random(), SharedSecretPolicy::Share);
//!
//! let mut engine = IngestionEngine::new(UdpTransport::new(socket), Dispatcher::new(registry, tx))?;
//! let stop = AtomicBool::new(false);
//! engine.run_until(&stop)?;
//! # Ok::<(), fieldgate_collector::CollectorError>(())
//! ```

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fieldgate_core::{
    IdleThreshold, MessageKind, MonotonicClock, SessionRegistry, TimeSource, Timestamp,
};
use log::{debug, info, warn};
use mio::{Events, Poll};

use crate::dispatch::{Dispatch, Dispatcher, DropReason};
use crate::error::{CollectorError, Result};
use crate::transport::{Inbound, Transport};

/// Readiness events collected per poll
const EVENTS_CAPACITY: usize = 1024;

/// Default bound on one readiness wait
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Running totals since the engine started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Hello messages received
    pub hellos: u64,
    /// Data messages received
    pub data: u64,
    /// Command messages received
    pub commands: u64,
    /// Malformed frames and undecodable payloads
    pub malformed: u64,
    /// Data/Command from peers without a session
    pub unknown_peer: u64,
    /// Hellos refused under the exclusive secret policy
    pub identity_refusals: u64,
    /// Updates dropped for implausible readings
    pub validation_rejects: u64,
    /// Updates handed to the queue
    pub enqueued: u64,
    /// Updates lost to a full or closed queue
    pub queue_drops: u64,
    /// Sessions removed for idleness
    pub evictions: u64,
    /// Stream connections that went away
    pub disconnects: u64,
    /// Sessionless connections closed for idleness
    pub idle_closes: u64,
}

/// What one [`IngestionEngine::turn`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnReport {
    /// Readiness events handled
    pub events: usize,
    /// Frames dispatched, malformed included
    pub messages: usize,
    /// Frames that were malformed or did not decode
    pub malformed: usize,
    /// Frames that went nowhere, for any reason
    pub dropped: usize,
    /// Sessions evicted for idleness
    pub evicted: usize,
    /// Connections closed by the peer or after a send failure
    pub closed: usize,
}

impl TurnReport {
    /// Nothing happened this turn
    pub fn is_idle(&self) -> bool {
        *self == TurnReport::default()
    }
}

/// Readiness loop over one transport
pub struct IngestionEngine<T: Transport> {
    poll: Poll,
    events: Events,
    transport: T,
    dispatcher: Dispatcher,
    clock: Box<dyn TimeSource>,
    idle: IdleThreshold,
    poll_timeout: Duration,
    stats: EngineStats,
    inbound: Vec<Inbound>,
}

impl<T: Transport> IngestionEngine<T> {
    /// Register `transport` with a fresh poller
    pub fn new(mut transport: T, dispatcher: Dispatcher) -> Result<Self> {
        let poll = Poll::new().map_err(CollectorError::Poll)?;
        transport.register(poll.registry())?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            transport,
            dispatcher,
            clock: Box::new(MonotonicClock::new()),
            idle: IdleThreshold::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            stats: EngineStats::default(),
            inbound: Vec::new(),
        })
    }

    /// Replace the clock used for `last_seen` and eviction
    pub fn with_clock(mut self, clock: impl TimeSource + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Set the idle eviction threshold
    pub fn with_idle_threshold(mut self, idle: IdleThreshold) -> Self {
        self.idle = idle;
        self
    }

    /// Set the readiness wait bound
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Bound address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Live sessions
    pub fn sessions(&self) -> &SessionRegistry {
        self.dispatcher.registry()
    }

    /// Totals so far
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Loop forever; returns only if the readiness poll fails
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.turn()?;
        }
    }

    /// Loop until `shutdown` is set, checked between turns
    pub fn run_until(&mut self, shutdown: &AtomicBool) -> Result<EngineStats> {
        while !shutdown.load(Ordering::Acquire) {
            self.turn()?;
        }
        info!(
            "Ingestion stopped with {} sessions, {} updates enqueued",
            self.dispatcher.registry().len(),
            self.stats.enqueued
        );
        Ok(self.stats)
    }

    /// One loop iteration: poll, dispatch, evict
    pub fn turn(&mut self) -> Result<TurnReport> {
        let mut report = TurnReport::default();

        let timeout = if self.transport.has_backlog() {
            Duration::ZERO
        } else {
            self.poll_timeout
        };
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CollectorError::Poll(e)),
        }

        let now = self.clock.now();
        let registry = self.poll.registry();
        if self.transport.has_backlog() {
            self.transport.resume(registry, now, &mut self.inbound);
        }
        for event in self.events.iter() {
            report.events += 1;
            self.transport.handle_event(registry, event, now, &mut self.inbound);
        }

        let mut inbound = mem::take(&mut self.inbound);
        for item in inbound.drain(..) {
            match item {
                Inbound::Frame(frame) => {
                    report.messages += 1;
                    if let Ok(message) = &frame.outcome {
                        self.count_kind(message.kind());
                    }
                    let outcome = self.dispatcher.dispatch(frame, now);
                    self.record(&outcome, &mut report);
                    if let Dispatch::Reply { peer, bytes, .. } = outcome {
                        self.send_reply(peer, &bytes, &mut report);
                    }
                }
                Inbound::Closed { peer, reason } => {
                    if let Some(session) = self.dispatcher.registry_mut().remove(peer) {
                        debug!("{}: session {} closed ({})", peer, session.device_id(), reason);
                    }
                    self.stats.disconnects += 1;
                    report.closed += 1;
                }
            }
        }
        self.inbound = inbound;

        self.evict(now, &mut report);
        Ok(report)
    }

    fn count_kind(&mut self, kind: MessageKind) {
        match kind {
            MessageKind::Hello => self.stats.hellos += 1,
            MessageKind::Data => self.stats.data += 1,
            MessageKind::Command => self.stats.commands += 1,
        }
    }

    fn record(&mut self, outcome: &Dispatch, report: &mut TurnReport) {
        let stats = &mut self.stats;
        match outcome {
            Dispatch::Reply { .. } | Dispatch::Command { .. } => {}
            Dispatch::Enqueued { displaced, .. } => {
                stats.enqueued += 1;
                if *displaced {
                    stats.queue_drops += 1;
                }
            }
            Dispatch::Dropped { reason, .. } => {
                report.dropped += 1;
                match reason {
                    DropReason::Malformed(_) | DropReason::Undecodable(_) => {
                        stats.malformed += 1;
                        report.malformed += 1;
                    }
                    DropReason::UnknownPeer => stats.unknown_peer += 1,
                    DropReason::IdentityInUse { .. } => stats.identity_refusals += 1,
                    DropReason::Rejected(_) => stats.validation_rejects += 1,
                    DropReason::QueueFull | DropReason::QueueClosed => stats.queue_drops += 1,
                }
            }
        }
    }

    /// A failed send ends the peer's session
    fn send_reply(&mut self, peer: SocketAddr, bytes: &[u8], report: &mut TurnReport) {
        let registry = self.poll.registry();
        let open = self.transport.connection_count();
        let Err(e) = self.transport.reply(registry, peer, bytes) else {
            return;
        };

        warn!("{}: reply failed, closing session: {}", peer, e);
        self.dispatcher.registry_mut().remove(peer);
        // The transport may already have dropped the connection itself
        let closed = self.transport.disconnect(registry, peer);
        if closed || self.transport.connection_count() < open {
            self.stats.disconnects += 1;
            report.closed += 1;
        }
    }

    fn evict(&mut self, now: Timestamp, report: &mut TurnReport) {
        let registry = self.poll.registry();
        for session in self.dispatcher.registry_mut().evict_idle(now, self.idle) {
            info!(
                "{}: evicted {} after {} idle minute(s)",
                session.peer(),
                session.device_id(),
                self.idle.minutes()
            );
            self.transport.disconnect(registry, session.peer());
            self.stats.evictions += 1;
            report.evicted += 1;
        }

        let sessions = self.dispatcher.registry();
        let has_session = |peer: SocketAddr| sessions.by_peer_address(peer).is_some();
        let closed = self.transport.close_idle(registry, now, self.idle, &has_session);
        self.stats.idle_closes += closed.len() as u64;
        report.closed += closed.len();
    }
}
