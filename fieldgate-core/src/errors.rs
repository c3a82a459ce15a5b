//! Error Types for Ingestion Failures
//!
//! ## Error Categories
//!
//! Every failure the ingestion path can observe falls into one of these:
//!
//! ### Malformed input
//! - [`FrameError`]: bad header, unknown kind code, declared-length mismatch,
//!   runaway stream segment
//! - [`DecodeError`]: `Data` payload that is not a JSON object of the expected shape,
//!   `Hello` secret that is not UTF-8
//!
//! Malformed input is always recoverable: the message is dropped, the peer's
//! session (if any) is left as it was.
//!
//! ### Peer state
//! - [`RegistryError`]: traffic from a peer without a session
//! - [`IdentityInUse`]: a `Hello` refused under the exclusive shared-secret policy
//!
//! ### Hand-off
//! - [`QueueError`]: bounded queue full, or the consumer side is gone
//!
//! ### Plausibility
//! - [`ValidationError`]: a reading that no real sensor could have produced
//!
//! ## Handling Strategy
//!
//! ```text
//! FrameError::Disconnected / Io  → close the connection (terminal for that peer)
//! FrameError (anything else)     → log, drop message, keep session
//! DecodeError                    → log, drop message, keep session
//! RegistryError::UnknownPeer     → log, drop message (policy permitting)
//! IdentityInUse                  → log, drop the Hello, no reply
//! QueueError::Full               → count + log the drop
//! ValidationError                → warn or reject per configured mode
//! ```

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::session::DeviceId;

/// Framing failures for both datagram and stream transports
#[derive(Error, Debug)]
pub enum FrameError {
    /// Fewer bytes than a full header
    #[error("Frame too short for header: {received} of 3 bytes")]
    TruncatedHeader {
        /// Bytes actually available
        received: usize,
    },

    /// Kind code outside the known message kinds
    #[error("Unknown message kind 0x{0:02x}")]
    UnknownKind(u8),

    /// Payload shorter (or, for stream segments, longer) than the header declared
    #[error("Declared payload length {declared} but received {received} bytes")]
    LengthMismatch {
        /// Length from the header
        declared: usize,
        /// Payload bytes actually present
        received: usize,
    },

    /// Payload cannot be described by a 16-bit length field
    #[error("Payload of {0} bytes exceeds the 65535 byte frame limit")]
    PayloadTooLarge(usize),

    /// Stream bytes piled up without a delimiter; the buffer was discarded
    #[error("Receive buffer exceeded {limit} bytes without a delimiter")]
    Overflow {
        /// Configured buffer limit
        limit: usize,
    },

    /// Peer closed the connection (zero-byte read)
    #[error("Peer disconnected")]
    Disconnected,

    /// Underlying socket failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the connection this error came from is unusable afterwards
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameError::Disconnected | FrameError::Io(_))
    }
}

/// Payload decoding failures
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Not JSON, or a recognized key carries the wrong type
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON but not an object
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// Hello secret is not valid UTF-8
    #[error("Secret is not valid UTF-8")]
    InvalidSecret,
}

/// Session registry failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Data/Command from a peer that never said Hello (or was evicted)
    #[error("Peer {0} has no session")]
    UnknownPeer(SocketAddr),
}

/// Exclusive policy: the derived id already belongs to another live peer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Device id {device_id} is already held by {holder}")]
pub struct IdentityInUse {
    /// The contested identity
    pub device_id: DeviceId,
    /// Peer currently holding it
    pub holder: SocketAddr,
}

/// Update queue failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Bounded queue at capacity; the new update was dropped
    #[error("Update queue full at {capacity} updates")]
    Full {
        /// Configured bound
        capacity: usize,
    },

    /// Every receiver is gone
    #[error("Update queue consumer disconnected")]
    Disconnected,
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Plausibility failures - kept small and `Copy`
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ValidationError {
    /// Value outside what the sensor can physically report
    #[error("Value {value} outside range [{min}, {max}]")]
    OutOfRange {
        /// The reading that failed
        value: f64,
        /// Lowest plausible value
        min: f64,
        /// Highest plausible value
        max: f64,
    },

    /// NaN or infinite
    #[error("Invalid value: not a finite number")]
    InvalidValue,
}
