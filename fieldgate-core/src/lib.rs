//! Core ingestion types for FieldGate
//!
//! Everything the collector needs between the socket and the publisher
//! thread, minus the sockets themselves:
//!
//! - [`message`]: the 3-byte header wire model (`Hello`, `Data`, `Command`)
//! - [`framing`]: datagram (length-prefixed) and stream (CRLF-delimited) framers
//! - [`session`]: shared-secret identity derivation and the per-peer session registry
//! - [`update`]: `EdgeUpdate` decoding from node JSON and the outbound broker shape
//! - [`queue`]: the single hand-off point between ingestion and publishing threads
//! - [`validators`]: plausibility checks for soil/air temperature and air humidity
//!
//! Key constraints:
//! - Registry and framer state is owned by exactly one thread
//! - Nothing here blocks except [`queue::UpdateReceiver::pop`]
//! - Decoding is pure: the same payload always yields the same update
//!
//! ```
//! use fieldgate_core::{EdgeUpdate, Reading};
//!
//! let update = EdgeUpdate::from_json(br#"{"uuid":"x","epoch":1000,"temp":21.5}"#).unwrap();
//! assert_eq!(update.reading(Reading::SoilTemp), Some(21.5));
//! assert_eq!(update.reading(Reading::AirTemp), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod framing;
pub mod message;
pub mod queue;
pub mod session;
pub mod time;
pub mod traits;
pub mod update;
pub mod validators;

// Public API
pub use errors::{
    DecodeError, FrameError, IdentityInUse, QueueError, RegistryError, ValidationError,
    ValidationResult,
};
pub use framing::{DatagramFramer, DatagramSource, Frame, Framer, SegmentMode, StreamFramer};
pub use message::{Header, Message, MessageKind, HEADER_LEN};
pub use queue::{
    update_queue, OverflowPolicy, Pushed, QueueConfig, QueueCounters, QueueStats, UpdateReceiver,
    UpdateSender,
};
pub use session::{
    DeviceId, IdleThreshold, IdentityNamespace, Registration, Session, SessionRegistry,
    SharedSecretPolicy,
};
pub use time::{ManualClock, MonotonicClock, TimeSource, Timestamp};
pub use traits::Validator;
pub use update::{EdgeUpdate, Epoch, PublishedUpdate, Reading};
pub use validators::{
    HumidityValidator, ReadingRange, ReadingRanges, ReadingValidator, ReadingViolation,
    TemperatureValidator,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
