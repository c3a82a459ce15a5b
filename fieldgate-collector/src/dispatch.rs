//! Message dispatch
//!
//! Turns one [`Frame`] into one [`Dispatch`] outcome. The dispatcher owns the
//! session registry and the producer end of the update queue; it never touches
//! a socket. Replies are returned to the engine, which hands them to the
//! transport.
//!
//! | Kind      | Registry             | Then                                             |
//! |-----------|----------------------|--------------------------------------------------|
//! | Hello     | `register_or_touch`  | reply with the device id                         |
//! | Data      | `touch`              | decode, validate, push to the queue             |
//! | Command   | `touch`              | nothing (reserved)                               |
//! | malformed | untouched            | drop                                             |
//!
//! Every drop is logged once, naming the peer.

use std::net::SocketAddr;

use fieldgate_core::{
    DecodeError, DeviceId, EdgeUpdate, Frame, FrameError, IdentityInUse, MessageKind, Pushed,
    QueueError, ReadingValidator, ReadingViolation, Registration, SessionRegistry, Timestamp,
    UpdateSender,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

/// Data and Command from peers without a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPeerPolicy {
    /// Log and discard
    #[default]
    Drop,
    /// Process without registering; the update keeps whatever id it carries
    Accept,
}

/// What implausible readings do to an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// No checks
    Off,
    /// Log each violation, enqueue anyway
    #[default]
    Warn,
    /// Log and drop the update
    Reject,
}

/// Why a message went nowhere
#[derive(Debug)]
pub enum DropReason {
    /// Framer could not make a message of it
    Malformed(FrameError),
    /// Payload did not decode
    Undecodable(DecodeError),
    /// Data or Command from a peer without a session
    UnknownPeer,
    /// Hello refused under the exclusive secret policy
    IdentityInUse {
        /// Id the secret derives to
        device_id: DeviceId,
        /// Peer already holding it
        holder: SocketAddr,
    },
    /// Readings outside their plausible range
    Rejected(Vec<ReadingViolation>),
    /// Bounded queue full under drop-newest
    QueueFull,
    /// Publisher is gone
    QueueClosed,
}

/// Outcome of dispatching one frame
#[derive(Debug)]
pub enum Dispatch {
    /// Hello accepted; send `bytes` back to `peer`
    Reply {
        /// Originating peer
        peer: SocketAddr,
        /// Raw device id, no header
        bytes: Vec<u8>,
        /// First Hello from this address
        created: bool,
    },
    /// Data decoded and queued
    Enqueued {
        /// Originating peer
        peer: SocketAddr,
        /// The oldest queued update was discarded to make room
        displaced: bool,
    },
    /// Command accepted and ignored
    Command {
        /// Originating peer
        peer: SocketAddr,
    },
    /// Nothing came of it
    Dropped {
        /// Originating peer
        peer: SocketAddr,
        /// Why
        reason: DropReason,
    },
}

impl Dispatch {
    /// Peer the outcome belongs to
    pub fn peer(&self) -> SocketAddr {
        match self {
            Dispatch::Reply { peer, .. }
            | Dispatch::Enqueued { peer, .. }
            | Dispatch::Command { peer }
            | Dispatch::Dropped { peer, .. } => *peer,
        }
    }

    fn dropped(peer: SocketAddr, reason: DropReason) -> Self {
        Dispatch::Dropped { peer, reason }
    }
}

/// Per-message policy over the registry and the update queue
#[derive(Debug)]
pub struct Dispatcher {
    registry: SessionRegistry,
    queue: UpdateSender,
    validator: ReadingValidator,
    validation: ValidationMode,
    unknown_peer: UnknownPeerPolicy,
    fill_device_id: bool,
}

impl Dispatcher {
    /// Dispatcher with default policies
    pub fn new(registry: SessionRegistry, queue: UpdateSender) -> Self {
        Self {
            registry,
            queue,
            validator: ReadingValidator::default(),
            validation: ValidationMode::default(),
            unknown_peer: UnknownPeerPolicy::default(),
            fill_device_id: false,
        }
    }

    /// Set reading validation
    pub fn with_validation(mut self, mode: ValidationMode, validator: ReadingValidator) -> Self {
        self.validation = mode;
        self.validator = validator;
        self
    }

    /// Set the unknown-peer policy
    pub fn with_unknown_peer(mut self, policy: UnknownPeerPolicy) -> Self {
        self.unknown_peer = policy;
        self
    }

    /// Fill a missing payload `uuid` from the session
    pub fn with_fill_device_id(mut self, fill: bool) -> Self {
        self.fill_device_id = fill;
        self
    }

    /// Session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Session registry, for eviction and stream closes
    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Producer end of the update queue
    pub fn queue(&self) -> &UpdateSender {
        &self.queue
    }

    /// Handle one frame
    pub fn dispatch(&mut self, frame: Frame, now: Timestamp) -> Dispatch {
        let peer = frame.peer;
        match frame.outcome {
            Err(e) => {
                warn!("{}: malformed message dropped: {}", peer, e);
                Dispatch::dropped(peer, DropReason::Malformed(e))
            }
            Ok(message) => match message.kind() {
                MessageKind::Hello => self.hello(peer, message.into_payload(), now),
                MessageKind::Data => self.data(peer, message.payload(), now),
                MessageKind::Command => self.command(peer, now),
            },
        }
    }

    fn hello(&mut self, peer: SocketAddr, payload: Vec<u8>, now: Timestamp) -> Dispatch {
        let Ok(secret) = String::from_utf8(payload) else {
            warn!("{}: hello dropped: {}", peer, DecodeError::InvalidSecret);
            return Dispatch::dropped(peer, DropReason::Undecodable(DecodeError::InvalidSecret));
        };

        match self.registry.register_or_touch(peer, &secret, now) {
            Ok(registration) => {
                let device_id = registration.device_id();
                let created = matches!(registration, Registration::Created(_));
                if created {
                    info!("{}: registered as {}", peer, device_id);
                } else {
                    debug!("{}: hello refreshed {}", peer, device_id);
                }
                Dispatch::Reply {
                    peer,
                    bytes: device_id.to_reply_bytes(),
                    created,
                }
            }
            Err(IdentityInUse { device_id, holder }) => {
                warn!("{}: hello refused, {} is held by {}", peer, device_id, holder);
                Dispatch::dropped(peer, DropReason::IdentityInUse { device_id, holder })
            }
        }
    }

    /// Touch the session; `Err` carries the drop when the peer is unknown
    fn touch(&mut self, peer: SocketAddr, now: Timestamp, what: &str) -> Result<Option<DeviceId>, Dispatch> {
        match self.registry.touch(peer, now) {
            Ok(session) => Ok(Some(session.device_id())),
            Err(_) if self.unknown_peer == UnknownPeerPolicy::Accept => {
                debug!("{}: {} from unregistered peer accepted", peer, what);
                Ok(None)
            }
            Err(e) => {
                warn!("{}: {} dropped: {}", peer, what, e);
                Err(Dispatch::dropped(peer, DropReason::UnknownPeer))
            }
        }
    }

    fn data(&mut self, peer: SocketAddr, payload: &[u8], now: Timestamp) -> Dispatch {
        let session_id = match self.touch(peer, now, "data") {
            Ok(id) => id,
            Err(dropped) => return dropped,
        };

        let mut update = match EdgeUpdate::from_json(payload) {
            Ok(update) => update,
            Err(e) => {
                warn!("{}: data dropped: {}", peer, e);
                return Dispatch::dropped(peer, DropReason::Undecodable(e));
            }
        };

        if self.fill_device_id && update.device_id().is_none() {
            if let Some(id) = session_id {
                update = update.with_device_id(id.to_string());
            }
        }

        if self.validation != ValidationMode::Off {
            let violations = self.validator.check(&update);
            if !violations.is_empty() {
                let summary = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                if self.validation == ValidationMode::Reject {
                    warn!("{}: data rejected: {}", peer, summary);
                    return Dispatch::dropped(peer, DropReason::Rejected(violations));
                }
                warn!("{}: implausible readings: {}", peer, summary);
            }
        }

        debug!("{}: {}", peer, update);
        match self.queue.push(update) {
            Ok(pushed) => {
                let displaced = pushed == Pushed::DisplacedOldest;
                if displaced {
                    warn!("{}: queue full, oldest update dropped", peer);
                }
                Dispatch::Enqueued { peer, displaced }
            }
            Err(e @ QueueError::Full { .. }) => {
                warn!("{}: data dropped: {}", peer, e);
                Dispatch::dropped(peer, DropReason::QueueFull)
            }
            Err(e @ QueueError::Disconnected) => {
                error!("{}: data dropped: {}", peer, e);
                Dispatch::dropped(peer, DropReason::QueueClosed)
            }
        }
    }

    fn command(&mut self, peer: SocketAddr, now: Timestamp) -> Dispatch {
        match self.touch(peer, now, "command") {
            Ok(_) => {
                debug!("{}: command ignored", peer);
                Dispatch::Command { peer }
            }
            Err(dropped) => dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgate_core::{
        update_queue, IdentityNamespace, Message, OverflowPolicy, QueueConfig, Reading,
        ReadingRanges, SharedSecretPolicy, UpdateReceiver,
    };
    use uuid::Uuid;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], port))
    }

    fn dispatcher(queue: QueueConfig, policy: SharedSecretPolicy) -> (Dispatcher, UpdateReceiver) {
        let registry = SessionRegistry::new(IdentityNamespace::fixed(Uuid::NAMESPACE_OID), policy);
        let (tx, rx) = update_queue(queue);
        (Dispatcher::new(registry, tx), rx)
    }

    fn hello(port: u16, secret: &str) -> Frame {
        Frame::message(peer(port), Message::hello(secret))
    }

    fn data(port: u16, json: &str) -> Frame {
        Frame::message(peer(port), Message::data(json.as_bytes()))
    }

    fn reply_bytes(dispatch: Dispatch) -> Vec<u8> {
        match dispatch {
            Dispatch::Reply { bytes, .. } => bytes,
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn hello_replies_with_stable_id() {
        let (mut d, _rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);

        let first = d.dispatch(hello(5000, "abc123"), 0);
        assert!(matches!(first, Dispatch::Reply { created: true, .. }));
        let first = reply_bytes(first);
        let second = d.dispatch(hello(5000, "abc123"), 10);
        assert!(matches!(second, Dispatch::Reply { created: false, .. }));

        assert!(!first.is_empty());
        assert_eq!(first, reply_bytes(second));
        assert_eq!(d.registry().by_peer_address(peer(5000)).unwrap().last_seen(), 10);
    }

    #[test]
    fn data_reaches_queue() {
        let (mut d, rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);
        d.dispatch(hello(5000, "abc123"), 0);

        let outcome = d.dispatch(data(5000, r#"{"uuid":"x","epoch":1000,"temp":21.5}"#), 5);
        assert!(matches!(outcome, Dispatch::Enqueued { displaced: false, .. }));

        let update = rx.try_pop().unwrap();
        assert_eq!(update.device_id(), Some("x"));
        assert_eq!(update.reading(Reading::SoilTemp), Some(21.5));
        assert_eq!(update.reading(Reading::AirTemp), None);
        assert_eq!(update.reading(Reading::AirHumidity), None);
        assert_eq!(d.registry().by_peer_address(peer(5000)).unwrap().last_seen(), 5);
    }

    #[test]
    fn unknown_peer_policies() {
        let (mut d, rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);
        let outcome = d.dispatch(data(6000, r#"{"temp":1.0}"#), 0);
        assert!(matches!(outcome, Dispatch::Dropped { reason: DropReason::UnknownPeer, .. }));
        let outcome = d.dispatch(Frame::message(peer(6000), Message::new(MessageKind::Command, vec![])), 0);
        assert!(matches!(outcome, Dispatch::Dropped { reason: DropReason::UnknownPeer, .. }));
        assert!(rx.try_pop().is_none());

        let mut d = d.with_unknown_peer(UnknownPeerPolicy::Accept).with_fill_device_id(true);
        let outcome = d.dispatch(data(6000, r#"{"temp":1.0}"#), 0);
        assert!(matches!(outcome, Dispatch::Enqueued { .. }));
        // Accepting never invents an identity or a session
        assert_eq!(rx.try_pop().unwrap().device_id(), None);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn fill_device_id_from_session() {
        let (d, rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);
        let mut d = d.with_fill_device_id(true);
        let id = String::from_utf8(reply_bytes(d.dispatch(hello(5000, "abc123"), 0))).unwrap();

        d.dispatch(data(5000, r#"{"temp":3.0}"#), 1);
        d.dispatch(data(5000, r#"{"uuid":"own","temp":3.0}"#), 1);

        assert_eq!(rx.try_pop().unwrap().device_id(), Some(id.as_str()));
        assert_eq!(rx.try_pop().unwrap().device_id(), Some("own"));
    }

    #[test]
    fn malformed_and_undecodable_leave_session_intact() {
        let (mut d, rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);
        d.dispatch(hello(5000, "abc123"), 0);

        let outcome = d.dispatch(
            Frame::malformed(peer(5000), FrameError::LengthMismatch { declared: 10, received: 2 }),
            30,
        );
        assert!(matches!(outcome, Dispatch::Dropped { reason: DropReason::Malformed(_), .. }));
        // A malformed frame is not activity
        assert_eq!(d.registry().by_peer_address(peer(5000)).unwrap().last_seen(), 0);

        let outcome = d.dispatch(data(5000, "not json"), 40);
        assert!(matches!(outcome, Dispatch::Dropped { reason: DropReason::Undecodable(_), .. }));
        let outcome = d.dispatch(data(5000, "[1,2]"), 40);
        assert!(matches!(
            outcome,
            Dispatch::Dropped { reason: DropReason::Undecodable(DecodeError::NotAnObject), .. }
        ));

        let outcome = d.dispatch(Frame::message(peer(5001), Message::new(MessageKind::Hello, vec![0xff, 0xfe])), 0);
        assert!(matches!(
            outcome,
            Dispatch::Dropped { reason: DropReason::Undecodable(DecodeError::InvalidSecret), .. }
        ));

        assert_eq!(d.registry().len(), 1);
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn command_touches_session() {
        let (mut d, _rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);
        d.dispatch(hello(5000, "abc123"), 0);
        let outcome = d.dispatch(Frame::message(peer(5000), Message::new(MessageKind::Command, b"reboot".to_vec())), 7);
        assert!(matches!(outcome, Dispatch::Command { .. }));
        assert_eq!(d.registry().by_peer_address(peer(5000)).unwrap().last_seen(), 7);
    }

    #[test]
    fn validation_modes() {
        let implausible = r#"{"uuid":"x","dhtH":140.0}"#;

        let (d, rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);
        let mut d = d.with_validation(
            ValidationMode::Reject,
            ReadingValidator::from_ranges(&ReadingRanges::default()),
        );
        d.dispatch(hello(5000, "abc123"), 0);
        match d.dispatch(data(5000, implausible), 1) {
            Dispatch::Dropped { reason: DropReason::Rejected(violations), .. } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].reading, Reading::AirHumidity);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(rx.try_pop().is_none());

        let mut d = d.with_validation(ValidationMode::Warn, ReadingValidator::default());
        assert!(matches!(d.dispatch(data(5000, implausible), 2), Dispatch::Enqueued { .. }));

        let mut d = d.with_validation(ValidationMode::Off, ReadingValidator::default());
        assert!(matches!(d.dispatch(data(5000, implausible), 3), Dispatch::Enqueued { .. }));
        assert_eq!(rx.stats().snapshot().pushed, 2);
    }

    #[test]
    fn exclusive_secret_refuses_second_peer() {
        let (mut d, _rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Exclusive);
        let id = reply_bytes(d.dispatch(hello(5000, "shared"), 0));

        match d.dispatch(hello(5001, "shared"), 1) {
            Dispatch::Dropped { reason: DropReason::IdentityInUse { device_id, holder }, peer: p } => {
                assert_eq!(device_id.to_string().into_bytes(), id);
                assert_eq!(holder, peer(5000));
                assert_eq!(p, peer(5001));
            }
            other => panic!("expected refusal, got {:?}", other),
        }

        let (mut d, _rx) = dispatcher(QueueConfig::unbounded(), SharedSecretPolicy::Share);
        let first = reply_bytes(d.dispatch(hello(5000, "shared"), 0));
        assert_eq!(first, reply_bytes(d.dispatch(hello(5001, "shared"), 1)));
        assert_eq!(d.registry().len(), 2);
    }

    #[test]
    fn queue_overflow_and_closed_consumer() {
        let (mut d, rx) = dispatcher(
            QueueConfig::bounded(1, OverflowPolicy::DropNewest),
            SharedSecretPolicy::Share,
        );
        d.dispatch(hello(5000, "abc123"), 0);
        assert!(matches!(d.dispatch(data(5000, "{}"), 1), Dispatch::Enqueued { .. }));
        assert!(matches!(
            d.dispatch(data(5000, "{}"), 2),
            Dispatch::Dropped { reason: DropReason::QueueFull, .. }
        ));

        drop(rx);
        assert!(matches!(
            d.dispatch(data(5000, "{}"), 3),
            Dispatch::Dropped { reason: DropReason::QueueClosed, .. }
        ));

        let (mut d, _rx) = dispatcher(
            QueueConfig::bounded(1, OverflowPolicy::DropOldest),
            SharedSecretPolicy::Share,
        );
        d.dispatch(hello(5000, "abc123"), 0);
        d.dispatch(data(5000, "{}"), 1);
        assert!(matches!(
            d.dispatch(data(5000, "{}"), 2),
            Dispatch::Enqueued { displaced: true, .. }
        ));
    }
}
