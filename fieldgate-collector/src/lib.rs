//! FieldGate collector
//!
//! The process that owns the listening socket:
//!
//! ```text
//!            ┌──────────────────────── ingestion thread ────────────────────────┐
//! socket ──► │ Transport ──► Framer ──► Dispatcher ──► SessionRegistry          │
//!            │                              │                                    │
//!            │                              └──► UpdateSender ──┐   evict_idle  │
//!            └───────────────────────────────────────────────────┼───────────────┘
//!                                                                ▼
//!                                     publisher thread: UpdateReceiver ──► Publisher
//! ```
//!
//! - [`socket`]: bind with linger off, address reuse, receive timeout, non-blocking
//! - [`transport`]: datagram (UDP) and stream (TCP) readiness handling
//! - [`dispatch`]: per-message policy (Hello, Data, Command, malformed)
//! - [`engine`]: the readiness loop, one [`engine::IngestionEngine::turn`] at a time
//! - [`app`]: wiring from a [`config::CollectorConfig`] to a running collector

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod socket;
pub mod transport;

pub use config::{CollectorConfig, ConfigError, TransportKind};
pub use dispatch::{Dispatch, Dispatcher, DropReason, UnknownPeerPolicy, ValidationMode};
pub use engine::{EngineStats, IngestionEngine, TurnReport};
pub use error::{CollectorError, Result};
pub use transport::{Inbound, TcpTransport, Transport, UdpTransport};
