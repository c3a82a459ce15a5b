//! Delimiter framing (TCP)
//!
//! Bytes arrive in arbitrary chunks. Each chunk is appended to the
//! connection's receive buffer, every `\r\n`-terminated segment is cut out
//! in arrival order, and the undelimited tail waits for the next read.
//!
//! ```text
//! read 1: "msg1\r\nmsg2"      → emit "msg1",  buffer "msg2"
//! read 2: "\r\npart"          → emit "msg2",  buffer "part"
//! read 3: 0 bytes             → Disconnected (sticky)
//! ```
//!
//! ## Segment interpretation
//!
//! | Mode                   | Segment contents          | Kind                          |
//! |------------------------|---------------------------|-------------------------------|
//! | [`SegmentMode::Tagged`]   | header + payload          | from the header               |
//! | [`SegmentMode::Implicit`] | raw payload               | first `Hello`, then `Data`    |
//!
//! Tagged segments must declare exactly the payload that sits between the
//! header and the delimiter. A header whose length bytes happen to be
//! `0x0d 0x0a` cannot be carried in tagged mode.

use std::io::{self, Read};
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::{Frame, Framer};
use crate::errors::FrameError;
use crate::message::{Header, Message, MessageKind, HEADER_LEN};

/// Segment terminator
pub const DELIMITER: &[u8] = b"\r\n";

/// Default receive buffer limit per connection
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// Bytes pulled from the socket per read call
const READ_CHUNK: usize = 4096;

/// How a delimited segment maps onto a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMode {
    /// Segment starts with the 3-byte header
    #[default]
    Tagged,
    /// First segment is the Hello secret, the rest are Data
    Implicit,
}

/// Why a connection stopped producing bytes
#[derive(Debug, Clone, Copy)]
enum Closed {
    Disconnected,
    Failed(io::ErrorKind),
}

impl Closed {
    fn to_error(self) -> FrameError {
        match self {
            Closed::Disconnected => FrameError::Disconnected,
            Closed::Failed(kind) => FrameError::Io(io::Error::from(kind)),
        }
    }
}

/// Per-connection delimiter framer owning the receive buffer
#[derive(Debug)]
pub struct StreamFramer {
    peer: SocketAddr,
    mode: SegmentMode,
    recv_buffer: Vec<u8>,
    /// Buffer prefix already searched for a delimiter
    scanned: usize,
    max_buffer: usize,
    seen_hello: bool,
    closed: Option<Closed>,
}

impl StreamFramer {
    /// Framer for the connection from `peer`
    pub fn new(peer: SocketAddr, mode: SegmentMode) -> Self {
        Self::with_max_buffer(peer, mode, DEFAULT_MAX_BUFFER)
    }

    /// Framer discarding the buffer once it exceeds `max_buffer` bytes
    pub fn with_max_buffer(peer: SocketAddr, mode: SegmentMode, max_buffer: usize) -> Self {
        Self {
            peer,
            mode,
            recv_buffer: Vec::new(),
            scanned: 0,
            max_buffer,
            seen_hello: false,
            closed: None,
        }
    }

    /// Remote address of the connection
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Segment interpretation in use
    pub fn mode(&self) -> SegmentMode {
        self.mode
    }

    /// Bytes waiting for a delimiter
    pub fn buffered(&self) -> &[u8] {
        &self.recv_buffer
    }

    /// Whether the connection has reported EOF or failed
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Append `bytes` and cut out every complete segment
    ///
    /// Empty segments (`\r\n\r\n`) are skipped. If the undelimited remainder
    /// grows past the limit it is discarded and reported as an
    /// [`FrameError::Overflow`] frame; the connection stays usable.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.recv_buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;

        while let Some(offset) = find_delimiter(&self.recv_buffer[search_from..]) {
            let end = search_from + offset;
            if end > start {
                let segment = self.recv_buffer[start..end].to_vec();
                frames.push(self.decode_segment(segment));
            }
            start = end + DELIMITER.len();
            search_from = start;
        }

        self.recv_buffer.drain(..start);
        // A delimiter may straddle this read and the next
        self.scanned = self.recv_buffer.len().saturating_sub(DELIMITER.len() - 1);

        if self.recv_buffer.len() > self.max_buffer {
            log::warn!(
                "{}: dropping {} undelimited bytes",
                self.peer,
                self.recv_buffer.len()
            );
            self.recv_buffer.clear();
            self.scanned = 0;
            frames.push(Frame::malformed(
                self.peer,
                FrameError::Overflow { limit: self.max_buffer },
            ));
        }

        frames
    }

    fn decode_segment(&mut self, segment: Vec<u8>) -> Frame {
        let outcome = match self.mode {
            SegmentMode::Tagged => decode_tagged(segment),
            SegmentMode::Implicit => {
                let kind = if self.seen_hello {
                    MessageKind::Data
                } else {
                    self.seen_hello = true;
                    MessageKind::Hello
                };
                Ok(Message::new(kind, segment))
            }
        };

        Frame { peer: self.peer, outcome }
    }
}

fn decode_tagged(mut segment: Vec<u8>) -> Result<Message, FrameError> {
    let header = Header::parse(&segment)?;
    let payload = segment.split_off(HEADER_LEN);
    Message::from_parts(header, payload)
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

impl<S: Read + ?Sized> Framer<S> for StreamFramer {
    fn poll_frames(&mut self, source: &mut S) -> nb::Result<Vec<Frame>, FrameError> {
        if let Some(closed) = self.closed {
            return Err(nb::Error::Other(closed.to_error()));
        }

        let mut frames = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut failure = None;

        loop {
            match source.read(&mut chunk) {
                Ok(0) => {
                    self.closed = Some(Closed::Disconnected);
                    break;
                }
                Ok(n) => frames.extend(self.feed(&chunk[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.closed = Some(Closed::Failed(e.kind()));
                    failure = Some(e);
                    break;
                }
            }
        }

        if !frames.is_empty() {
            return Ok(frames);
        }

        match (failure, self.closed) {
            (Some(e), _) => Err(nb::Error::Other(FrameError::Io(e))),
            (None, Some(closed)) => Err(nb::Error::Other(closed.to_error())),
            (None, None) => Err(nb::Error::WouldBlock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader that hands out scripted chunks, then would-block or EOF
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
        eof: bool,
    }

    impl ChunkedReader {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                eof: false,
            }
        }

        fn push(&mut self, chunk: &[u8]) {
            self.chunks.push_back(chunk.to_vec());
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    fn peer() -> SocketAddr {
        "192.168.1.20:5123".parse().unwrap()
    }

    fn payloads(frames: Vec<Frame>) -> Vec<Vec<u8>> {
        frames
            .into_iter()
            .map(|f| f.outcome.unwrap().into_payload())
            .collect()
    }

    #[test]
    fn partial_segment_stays_buffered() {
        let mut framer = StreamFramer::new(peer(), SegmentMode::Implicit);
        let mut reader = ChunkedReader::new(&[b"msg1\r\nmsg2"]);

        let frames = framer.poll_frames(&mut reader).unwrap();
        assert_eq!(payloads(frames), vec![b"msg1".to_vec()]);
        assert_eq!(framer.buffered(), b"msg2");

        assert!(matches!(framer.poll_frames(&mut reader), Err(nb::Error::WouldBlock)));

        reader.push(b"\r\npart");
        let frames = framer.poll_frames(&mut reader).unwrap();
        assert_eq!(payloads(frames), vec![b"msg2".to_vec()]);
        assert_eq!(framer.buffered(), b"part");
    }

    #[test]
    fn implicit_mode_starts_with_hello() {
        let mut framer = StreamFramer::new(peer(), SegmentMode::Implicit);
        let frames = framer.feed(b"secret\r\n{\"temp\":1}\r\n{\"temp\":2}\r\n");

        let kinds: Vec<_> = frames
            .iter()
            .map(|f| f.outcome.as_ref().unwrap().kind())
            .collect();
        assert_eq!(kinds, vec![MessageKind::Hello, MessageKind::Data, MessageKind::Data]);
    }

    #[test]
    fn delimiter_split_across_reads() {
        let mut framer = StreamFramer::new(peer(), SegmentMode::Implicit);
        assert!(framer.feed(b"abc\r").is_empty());
        let frames = framer.feed(b"\ndef\r\n");
        assert_eq!(payloads(frames), vec![b"abc".to_vec(), b"def".to_vec()]);
        assert!(framer.buffered().is_empty());
    }

    #[test]
    fn empty_segments_skipped() {
        let mut framer = StreamFramer::new(peer(), SegmentMode::Implicit);
        let frames = framer.feed(b"\r\n\r\nx\r\n\r\n");
        assert_eq!(payloads(frames), vec![b"x".to_vec()]);
    }

    #[test]
    fn tagged_segments_use_header() {
        let mut framer = StreamFramer::new(peer(), SegmentMode::Tagged);
        let mut bytes = Message::hello("abc123").encode().unwrap();
        bytes.extend_from_slice(DELIMITER);
        bytes.extend_from_slice(&Message::data("{}").encode().unwrap());
        bytes.extend_from_slice(DELIMITER);

        let frames = framer.feed(&bytes);
        assert_eq!(frames.len(), 2);
        let hello = frames[0].outcome.as_ref().unwrap();
        assert_eq!(hello.kind(), MessageKind::Hello);
        assert_eq!(hello.payload(), b"abc123");
        assert_eq!(frames[1].outcome.as_ref().unwrap().kind(), MessageKind::Data);
    }

    #[test]
    fn tagged_length_must_match_segment() {
        let mut framer = StreamFramer::new(peer(), SegmentMode::Tagged);
        let frames = framer.feed(b"\x02\x05\x00abc\r\n");
        assert!(matches!(
            frames[0].outcome,
            Err(FrameError::LengthMismatch { declared: 5, received: 3 })
        ));
    }

    #[test]
    fn overflow_discards_buffer_but_keeps_connection() {
        let mut framer = StreamFramer::with_max_buffer(peer(), SegmentMode::Implicit, 8);
        let frames = framer.feed(b"0123456789");
        assert!(matches!(frames[0].outcome, Err(FrameError::Overflow { limit: 8 })));
        assert!(framer.buffered().is_empty());
        assert!(!framer.is_closed());

        let frames = framer.feed(b"ok\r\n");
        assert_eq!(payloads(frames), vec![b"ok".to_vec()]);
    }

    #[test]
    fn disconnect_is_sticky() {
        let mut framer = StreamFramer::new(peer(), SegmentMode::Implicit);
        let mut reader = ChunkedReader::new(&[b"last\r\n"]);
        reader.eof = true;

        // Frames read before EOF come first
        let frames = framer.poll_frames(&mut reader).unwrap();
        assert_eq!(payloads(frames), vec![b"last".to_vec()]);
        assert!(framer.is_closed());

        for _ in 0..2 {
            assert!(matches!(
                framer.poll_frames(&mut reader),
                Err(nb::Error::Other(FrameError::Disconnected))
            ));
        }
    }

    #[test]
    fn read_failure_is_terminal() {
        struct Resetting;
        impl Read for Resetting {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
        }

        let mut framer = StreamFramer::new(peer(), SegmentMode::Tagged);
        match framer.poll_frames(&mut Resetting) {
            Err(nb::Error::Other(FrameError::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("expected reset, got {other:?}"),
        }
        assert!(framer.is_closed());
    }

    #[test]
    fn segment_mode_names() {
        let mode: SegmentMode = serde_json::from_str("\"implicit\"").unwrap();
        assert_eq!(mode, SegmentMode::Implicit);
        assert_eq!(SegmentMode::default(), SegmentMode::Tagged);
    }
}
