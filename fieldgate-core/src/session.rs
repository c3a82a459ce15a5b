//! Session Registry
//!
//! ## Identity
//!
//! Nodes never receive a pre-provisioned id. They prove membership with a
//! shared secret and get back a name-based UUID:
//!
//! ```text
//! device_id = UUIDv3(namespace, secret)
//! ```
//!
//! The namespace is drawn fresh (UUIDv4) each time the gateway starts unless
//! one is configured, so ids are stable for one process run only. Two peers
//! presenting the same secret derive the same id; whether the second one is
//! accepted is a [`SharedSecretPolicy`] decision.
//!
//! ## Lifecycle
//!
//! ```text
//!               Hello                  Hello / Data / Command
//! Unregistered ───────► Registered ◄──────────────┐
//!                          │  └────────────────────┘
//!                          ├── idle ≥ threshold ──► Evicted
//!                          └── stream closed ────► Closed
//! ```
//!
//! Evicted and closed sessions are gone; a later Hello from the same address
//! builds a brand-new [`Session`].
//!
//! ## Idle granularity
//!
//! Idleness is measured in whole minutes, rounded down. With a one-minute
//! threshold a session survives 59.9 s of silence and is evicted on the
//! first sweep after 60 s.

use core::fmt;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{IdentityInUse, RegistryError};
use crate::time::{whole_minutes_between, Timestamp};

/// Derived device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Bytes sent back in reply to a Hello: the hyphenated id, no header
    pub fn to_reply_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Namespace all device ids are derived under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityNamespace(Uuid);

impl IdentityNamespace {
    /// Fresh namespace; ids issued under it die with the process
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Fixed namespace, ids survive restarts
    pub fn fixed(namespace: Uuid) -> Self {
        Self(namespace)
    }

    /// Namespace UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Derive the id for `secret`
    pub fn derive(&self, secret: &str) -> DeviceId {
        DeviceId(Uuid::new_v3(&self.0, secret.as_bytes()))
    }
}

/// What to do when a second peer presents a secret already in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedSecretPolicy {
    /// Both peers share the derived id
    #[default]
    Share,
    /// Refuse the Hello while another live peer holds the id
    Exclusive,
}

/// Registry entry for one peer address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    peer: SocketAddr,
    device_id: DeviceId,
    registered_at: Timestamp,
    last_seen: Timestamp,
}

impl Session {
    fn new(peer: SocketAddr, device_id: DeviceId, now: Timestamp) -> Self {
        Self {
            peer,
            device_id,
            registered_at: now,
            last_seen: now,
        }
    }

    /// Transport address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Derived identity
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// When this session object was created
    pub fn registered_at(&self) -> Timestamp {
        self.registered_at
    }

    /// Last message attributed to this peer
    pub fn last_seen(&self) -> Timestamp {
        self.last_seen
    }
}

/// Outcome of a Hello
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New session for a previously unknown peer
    Created(DeviceId),
    /// Existing session touched (and re-keyed if the secret changed)
    Refreshed(DeviceId),
}

impl Registration {
    /// The id to reply with
    pub fn device_id(&self) -> DeviceId {
        match self {
            Registration::Created(id) | Registration::Refreshed(id) => *id,
        }
    }
}

/// Idle eviction threshold, whole minutes (at least one)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleThreshold {
    minutes: u64,
}

impl IdleThreshold {
    /// Threshold of `minutes`, clamped to one minute minimum
    pub fn from_minutes(minutes: u64) -> Self {
        Self { minutes: minutes.max(1) }
    }

    /// Configured minutes
    pub fn minutes(&self) -> u64 {
        self.minutes
    }

    /// Whether a session last seen at `last_seen` is idle at `now`
    pub fn is_idle(&self, last_seen: Timestamp, now: Timestamp) -> bool {
        whole_minutes_between(last_seen, now) >= self.minutes
    }
}

impl Default for IdleThreshold {
    fn default() -> Self {
        Self::from_minutes(1)
    }
}

/// Peer address → session map, owned by the ingestion loop
#[derive(Debug)]
pub struct SessionRegistry {
    namespace: IdentityNamespace,
    policy: SharedSecretPolicy,
    sessions: HashMap<SocketAddr, Session>,
}

impl SessionRegistry {
    /// Empty registry deriving ids under `namespace`
    pub fn new(namespace: IdentityNamespace, policy: SharedSecretPolicy) -> Self {
        Self {
            namespace,
            policy,
            sessions: HashMap::new(),
        }
    }

    /// Namespace in use
    pub fn namespace(&self) -> IdentityNamespace {
        self.namespace
    }

    /// Shared-secret policy in use
    pub fn policy(&self) -> SharedSecretPolicy {
        self.policy
    }

    /// Handle a Hello from `peer`
    ///
    /// Creates the session on first contact, otherwise refreshes
    /// `last_seen`. A peer that switches secrets keeps its session under the
    /// new id.
    pub fn register_or_touch(
        &mut self,
        peer: SocketAddr,
        secret: &str,
        now: Timestamp,
    ) -> Result<Registration, IdentityInUse> {
        let device_id = self.namespace.derive(secret);

        if self.policy == SharedSecretPolicy::Exclusive {
            if let Some(holder) = self
                .sessions
                .values()
                .find(|s| s.device_id == device_id && s.peer != peer)
            {
                return Err(IdentityInUse {
                    device_id,
                    holder: holder.peer,
                });
            }
        }

        match self.sessions.entry(peer) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                session.last_seen = now;
                if session.device_id != device_id {
                    log::info!(
                        "{}: secret changed, re-keyed {} -> {}",
                        peer,
                        session.device_id,
                        device_id
                    );
                    session.device_id = device_id;
                }
                Ok(Registration::Refreshed(device_id))
            }
            Entry::Vacant(entry) => {
                entry.insert(Session::new(peer, device_id, now));
                Ok(Registration::Created(device_id))
            }
        }
    }

    /// Refresh `last_seen` for a registered peer
    pub fn touch(&mut self, peer: SocketAddr, now: Timestamp) -> Result<&Session, RegistryError> {
        let session = self
            .sessions
            .get_mut(&peer)
            .ok_or(RegistryError::UnknownPeer(peer))?;
        session.last_seen = now;
        Ok(session)
    }

    /// Session for `peer`, if registered
    pub fn by_peer_address(&self, peer: SocketAddr) -> Option<&Session> {
        self.sessions.get(&peer)
    }

    /// Remove and return every session idle for at least `threshold`
    pub fn evict_idle(&mut self, now: Timestamp, threshold: IdleThreshold) -> Vec<Session> {
        let idle: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|s| threshold.is_idle(s.last_seen, now))
            .map(|s| s.peer)
            .collect();

        idle.into_iter()
            .filter_map(|peer| self.sessions.remove(&peer))
            .collect()
    }

    /// Drop the session for `peer` (stream close)
    pub fn remove(&mut self, peer: SocketAddr) -> Option<Session> {
        self.sessions.remove(&peer)
    }

    /// Live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// No live sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate live sessions in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MS_PER_MINUTE;
    use proptest::prelude::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(IdentityNamespace::random(), SharedSecretPolicy::Share)
    }

    #[test]
    fn repeated_hello_reissues_same_id() {
        let mut reg = registry();

        let first = reg.register_or_touch(addr(1), "abc123", 0).unwrap();
        let second = reg.register_or_touch(addr(1), "abc123", 500).unwrap();

        assert!(matches!(first, Registration::Created(_)));
        assert!(matches!(second, Registration::Refreshed(_)));
        assert_eq!(first.device_id(), second.device_id());
        assert!(!first.device_id().to_reply_bytes().is_empty());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.by_peer_address(addr(1)).unwrap().last_seen(), 500);
    }

    #[test]
    fn different_secrets_different_ids() {
        let ns = IdentityNamespace::random();
        assert_ne!(ns.derive("abc123"), ns.derive("abc124"));
    }

    #[test]
    fn namespaces_isolate_ids() {
        assert_ne!(
            IdentityNamespace::random().derive("abc123"),
            IdentityNamespace::random().derive("abc123")
        );
    }

    #[test]
    fn fixed_namespace_matches_uuid_v3() {
        let ns = IdentityNamespace::fixed(Uuid::NAMESPACE_DNS);
        let id = ns.derive("abc123");
        assert_eq!(*id.as_uuid(), Uuid::new_v3(&Uuid::NAMESPACE_DNS, b"abc123"));
        assert_eq!(id.as_uuid().get_version_num(), 3);
    }

    #[test]
    fn shared_secret_collides_under_share_policy() {
        let mut reg = registry();
        let a = reg.register_or_touch(addr(1), "fleet", 0).unwrap();
        let b = reg.register_or_touch(addr(2), "fleet", 0).unwrap();
        assert_eq!(a.device_id(), b.device_id());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn exclusive_policy_refuses_second_holder() {
        let mut reg = SessionRegistry::new(IdentityNamespace::random(), SharedSecretPolicy::Exclusive);
        let a = reg.register_or_touch(addr(1), "fleet", 0).unwrap();

        let err = reg.register_or_touch(addr(2), "fleet", 0).unwrap_err();
        assert_eq!(
            err,
            IdentityInUse {
                device_id: a.device_id(),
                holder: addr(1)
            }
        );
        assert!(reg.by_peer_address(addr(2)).is_none());

        // The holder itself may repeat its Hello
        assert!(reg.register_or_touch(addr(1), "fleet", 10).is_ok());
    }

    #[test]
    fn secret_change_rekeys_session() {
        let mut reg = registry();
        reg.register_or_touch(addr(1), "old", 0).unwrap();
        let new = reg.register_or_touch(addr(1), "new", 1).unwrap();

        assert_eq!(reg.by_peer_address(addr(1)).unwrap().device_id(), new.device_id());
        assert_eq!(reg.namespace().derive("new"), new.device_id());
    }

    #[test]
    fn touch_requires_session() {
        let mut reg = registry();
        assert_eq!(reg.touch(addr(9), 0), Err(RegistryError::UnknownPeer(addr(9))));

        reg.register_or_touch(addr(9), "s", 0).unwrap();
        assert_eq!(reg.touch(addr(9), 42).unwrap().last_seen(), 42);
    }

    #[test]
    fn sub_minute_idling_never_evicts() {
        let mut reg = registry();
        let threshold = IdleThreshold::from_minutes(1);
        reg.register_or_touch(addr(1), "s", 0).unwrap();

        assert!(reg.evict_idle(MS_PER_MINUTE - 1, threshold).is_empty());
        let evicted = reg.evict_idle(MS_PER_MINUTE, threshold);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].peer(), addr(1));
        assert!(reg.is_empty());
    }

    #[test]
    fn touched_session_survives_sweep() {
        let mut reg = registry();
        let threshold = IdleThreshold::from_minutes(2);
        reg.register_or_touch(addr(1), "a", 0).unwrap();
        reg.register_or_touch(addr(2), "b", 0).unwrap();

        reg.touch(addr(2), 90_000).unwrap();
        let evicted = reg.evict_idle(2 * MS_PER_MINUTE, threshold);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].peer(), addr(1));
        assert!(reg.by_peer_address(addr(2)).is_some());
    }

    #[test]
    fn hello_after_eviction_is_fresh_session() {
        let mut reg = registry();
        let threshold = IdleThreshold::default();
        let first = reg.register_or_touch(addr(1), "abc123", 0).unwrap();
        reg.evict_idle(3 * MS_PER_MINUTE, threshold);

        let later = 3 * MS_PER_MINUTE + 5;
        let second = reg.register_or_touch(addr(1), "abc123", later).unwrap();

        assert!(matches!(second, Registration::Created(_)));
        assert_eq!(first.device_id(), second.device_id());
        let session = reg.by_peer_address(addr(1)).unwrap();
        assert_eq!(session.registered_at(), later);
        assert_eq!(session.last_seen(), later);
    }

    #[test]
    fn threshold_clamps_to_one_minute() {
        assert_eq!(IdleThreshold::from_minutes(0).minutes(), 1);
        assert!(!IdleThreshold::from_minutes(0).is_idle(0, 30_000));
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(secret in ".*", port in 1u16..) {
            let mut reg = registry();
            let first = reg.register_or_touch(addr(port), &secret, 0).unwrap();
            let second = reg.register_or_touch(addr(port), &secret, 1).unwrap();
            prop_assert_eq!(first.device_id(), second.device_id());
            prop_assert_eq!(first.device_id(), reg.namespace().derive(&secret));
        }
    }
}
