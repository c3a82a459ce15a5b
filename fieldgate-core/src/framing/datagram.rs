//! Datagram framing (UDP)
//!
//! One message per packet, header first:
//!
//! 1. Peek the 3-byte header without consuming the datagram
//! 2. Read header + declared payload in a single `recv_from`
//! 3. Fewer bytes than declared → `LengthMismatch` (datagrams are atomic,
//!    there is no "rest" to wait for)
//!
//! Bytes beyond the declared length are cut off by the sized read and never
//! reach the dispatcher. A datagram whose header cannot be parsed is still
//! consumed, otherwise it would sit at the head of the socket queue forever.

use std::io;
use std::net::SocketAddr;

use super::{Frame, Framer};
use crate::errors::FrameError;
use crate::message::{Header, Message, HEADER_LEN, MAX_PAYLOAD_LEN};

/// Anything that can hand out whole datagrams with their sender
pub trait DatagramSource {
    /// Copy the head datagram into `buf` without removing it
    fn peek_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Remove the head datagram, copying at most `buf.len()` bytes of it
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSource for std::net::UdpSocket {
    fn peek_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        std::net::UdpSocket::peek_from(self, buf)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        std::net::UdpSocket::recv_from(self, buf)
    }
}

#[cfg(feature = "mio")]
impl DatagramSource for mio::net::UdpSocket {
    fn peek_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        mio::net::UdpSocket::peek_from(self, buf)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        mio::net::UdpSocket::recv_from(self, buf)
    }
}

/// Header-prefixed framer for connectionless sockets
#[derive(Debug)]
pub struct DatagramFramer {
    /// Reused receive buffer sized for the largest accepted frame
    buffer: Vec<u8>,
    max_payload: usize,
}

impl DatagramFramer {
    /// Framer accepting any payload a 16-bit length can describe
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_LEN)
    }

    /// Framer rejecting payloads longer than `max_payload`
    pub fn with_max_payload(max_payload: usize) -> Self {
        let max_payload = max_payload.min(MAX_PAYLOAD_LEN);
        Self {
            buffer: vec![0; HEADER_LEN + max_payload],
            max_payload,
        }
    }

    /// Largest payload this framer accepts
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Drop the head datagram after a header failure
    fn discard<S: DatagramSource + ?Sized>(&mut self, source: &S) -> Result<(), FrameError> {
        match source.recv_from(&mut self.buffer[..1]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(FrameError::Io(e)),
        }
    }
}

impl Default for DatagramFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DatagramSource + ?Sized> Framer<S> for DatagramFramer {
    fn poll_frames(&mut self, source: &mut S) -> nb::Result<Vec<Frame>, FrameError> {
        let mut raw_header = [0u8; HEADER_LEN];
        let (peeked, peer) = source.peek_from(&mut raw_header).map_err(would_block)?;

        let header = match Header::parse(&raw_header[..peeked]) {
            Ok(header) if header.length as usize > self.max_payload => {
                self.discard(source).map_err(nb::Error::Other)?;
                let error = FrameError::PayloadTooLarge(header.length as usize);
                return Ok(vec![Frame::malformed(peer, error)]);
            }
            Ok(header) => header,
            Err(error) => {
                self.discard(source).map_err(nb::Error::Other)?;
                return Ok(vec![Frame::malformed(peer, error)]);
            }
        };

        let frame_len = header.frame_len();
        let (received, peer) = source
            .recv_from(&mut self.buffer[..frame_len])
            .map_err(would_block)?;

        if received < HEADER_LEN {
            let error = FrameError::TruncatedHeader { received };
            return Ok(vec![Frame::malformed(peer, error)]);
        }

        let payload = self.buffer[HEADER_LEN..received].to_vec();
        let frame = match Message::from_parts(header, payload) {
            Ok(message) => Frame::message(peer, message),
            Err(error) => Frame::malformed(peer, error),
        };

        Ok(vec![frame])
    }
}

fn would_block(e: io::Error) -> nb::Error<FrameError> {
    if e.kind() == io::ErrorKind::WouldBlock {
        nb::Error::WouldBlock
    } else {
        nb::Error::Other(FrameError::Io(e))
    }
}
