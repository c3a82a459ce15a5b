//! Wire Message Model
//!
//! ## Header Layout
//!
//! Every datagram (and every tagged stream segment) starts with a fixed
//! 3-byte header:
//!
//! ```text
//! ┌──────────┬─────────────────────────┬──────────────────────────┐
//! │ kind: u8 │ length: u16 (LE)        │ payload: `length` bytes  │
//! └──────────┴─────────────────────────┴──────────────────────────┘
//!   byte 0     bytes 1-2                 bytes 3..3+length
//! ```
//!
//! | Code | Kind    | Payload                          |
//! |------|---------|----------------------------------|
//! | 0x01 | Hello   | UTF-8 shared secret              |
//! | 0x02 | Data    | JSON object with sensor readings |
//! | 0x03 | Command | reserved                         |
//!
//! Replies to `Hello` carry no header: the raw device identifier bytes only.

use core::fmt;

use crate::errors::FrameError;

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 3;

/// Largest payload a 16-bit length field can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Message kind carried in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Registration: payload is the shared secret
    Hello = 0x01,
    /// Sensor readings: payload is JSON
    Data = 0x02,
    /// Reserved for gateway-to-node control
    Command = 0x03,
}

impl MessageKind {
    /// Wire code for this kind
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable name
    pub const fn name(self) -> &'static str {
        match self {
            MessageKind::Hello => "hello",
            MessageKind::Data => "data",
            MessageKind::Command => "command",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = FrameError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(MessageKind::Hello),
            0x02 => Ok(MessageKind::Data),
            0x03 => Ok(MessageKind::Command),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed 3-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message kind
    pub kind: MessageKind,
    /// Declared payload length
    pub length: u16,
}

impl Header {
    /// Parse the header at the start of `bytes`
    ///
    /// Only the first [`HEADER_LEN`] bytes are inspected; anything after is
    /// the caller's business.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TruncatedHeader { received: bytes.len() });
        }

        let kind = MessageKind::try_from(bytes[0])?;
        let length = u16::from_le_bytes([bytes[1], bytes[2]]);

        Ok(Self { kind, length })
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let [lo, hi] = self.length.to_le_bytes();
        [self.kind.code(), lo, hi]
    }

    /// Total frame size: header plus declared payload
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.length as usize
    }
}

/// One complete message handed to the dispatcher
///
/// Framers only ever construct complete messages: for datagram framing the
/// payload length always equals the declared header length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    length: Option<u16>,
    payload: Vec<u8>,
}

impl Message {
    /// Message without a declared length (implicit stream segments)
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { kind, length: None, payload }
    }

    /// Message from a parsed header and the payload that followed it
    pub fn from_parts(header: Header, payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() != header.length as usize {
            return Err(FrameError::LengthMismatch {
                declared: header.length as usize,
                received: payload.len(),
            });
        }

        Ok(Self {
            kind: header.kind,
            length: Some(header.length),
            payload,
        })
    }

    /// Hello carrying a shared secret
    pub fn hello(secret: &str) -> Self {
        Self::new(MessageKind::Hello, secret.as_bytes().to_vec())
    }

    /// Data carrying a JSON document
    pub fn data(json: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Data, json.into())
    }

    /// Message kind
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Declared length, when the message arrived with a header
    pub fn declared_length(&self) -> Option<u16> {
        self.length
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Encode as header + payload, as a node would put it on the wire
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let length = u16::try_from(self.payload.len())
            .map_err(|_| FrameError::PayloadTooLarge(self.payload.len()))?;

        let header = Header { kind: self.kind, length };
        let mut frame = Vec::with_capacity(header.frame_len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_little_endian() {
        let header = Header::parse(&[0x02, 0x34, 0x12]).unwrap();
        assert_eq!(header.kind, MessageKind::Data);
        assert_eq!(header.length, 0x1234);
        assert_eq!(header.encode(), [0x02, 0x34, 0x12]);
        assert_eq!(header.frame_len(), 3 + 0x1234);
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(matches!(
            Header::parse(&[0x00, 0x01, 0x00]),
            Err(FrameError::UnknownKind(0x00))
        ));
        assert!(matches!(
            Header::parse(&[0x04, 0x01, 0x00]),
            Err(FrameError::UnknownKind(0x04))
        ));
    }

    #[test]
    fn short_header_rejected() {
        assert!(matches!(
            Header::parse(&[0x01, 0x00]),
            Err(FrameError::TruncatedHeader { received: 2 })
        ));
    }

    #[test]
    fn from_parts_enforces_length() {
        let header = Header { kind: MessageKind::Hello, length: 6 };
        assert!(Message::from_parts(header, b"abc123".to_vec()).is_ok());
        assert!(matches!(
            Message::from_parts(header, b"abc".to_vec()),
            Err(FrameError::LengthMismatch { declared: 6, received: 3 })
        ));
    }

    #[test]
    fn encode_prefixes_header() {
        let frame = Message::hello("abc123").encode().unwrap();
        assert_eq!(&frame[..3], &[0x01, 6, 0]);
        assert_eq!(&frame[3..], b"abc123");
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let msg = Message::data(vec![b'x'; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(msg.encode(), Err(FrameError::PayloadTooLarge(_))));
    }
}
