//! Framing: bytes off a socket in, complete messages out
//!
//! ## Overview
//!
//! Two framings coexist, one per transport class:
//!
//! | Framer            | Transport | Boundary                         | Partial data      |
//! |-------------------|-----------|----------------------------------|-------------------|
//! | [`DatagramFramer`] | UDP       | 3-byte header, one msg per packet | impossible (atomic) |
//! | [`StreamFramer`]   | TCP       | `\r\n` delimiter                  | buffered per connection |
//!
//! Both implement [`Framer`], so whatever drives the socket only ever sees
//! three outcomes:
//!
//! ```text
//! Ok(frames)                  → one or more frames ready (good or malformed)
//! Err(nb::Error::WouldBlock)  → no complete message yet, come back on readiness
//! Err(nb::Error::Other(e))    → source failed or peer went away
//! ```
//!
//! The model follows the pull-based `nb` convention: framers never block,
//! and "nothing yet" is not an error.
//!
//! ## Malformed vs terminal
//!
//! A malformed message is reported *inside* `Ok(frames)` as a frame whose
//! outcome is `Err(FrameError)`. That keeps the good messages that arrived
//! alongside it and lets the caller attribute the bad one to a peer. Only
//! conditions that end the source (disconnect, socket failure) come back as
//! `nb::Error::Other`.

use std::net::SocketAddr;

use crate::errors::FrameError;
use crate::message::Message;

mod datagram;
mod stream;

pub use datagram::{DatagramFramer, DatagramSource};
pub use stream::{SegmentMode, StreamFramer, DEFAULT_MAX_BUFFER, DELIMITER};

/// One unit of framer output, attributed to the peer that sent it
#[derive(Debug)]
pub struct Frame {
    /// Sender
    pub peer: SocketAddr,
    /// The message, or why it could not be framed
    pub outcome: Result<Message, FrameError>,
}

impl Frame {
    /// Well-formed message from `peer`
    pub fn message(peer: SocketAddr, message: Message) -> Self {
        Self { peer, outcome: Ok(message) }
    }

    /// Malformed input from `peer`
    pub fn malformed(peer: SocketAddr, error: FrameError) -> Self {
        Self { peer, outcome: Err(error) }
    }
}

/// Non-blocking message extraction from a byte source `S`
///
/// ## Contract
///
/// - Never blocks; a source that would block yields `WouldBlock`
/// - Never returns a partial payload
/// - Callers drain until `WouldBlock` or `Other`; frames decoded before a
///   failure are returned first and the failure follows on the next poll
/// - A connection framer keeps returning its terminal error once seen
pub trait Framer<S: ?Sized> {
    /// Pull every frame that is complete right now
    fn poll_frames(&mut self, source: &mut S) -> nb::Result<Vec<Frame>, FrameError>;
}
