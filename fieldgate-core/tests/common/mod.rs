//! Shared fixtures for fieldgate-core integration tests
//!
//! In-memory stand-ins for sockets so framers can be driven without the
//! network:
//! - [`DatagramQueue`]: peek/recv semantics of a UDP socket
//! - [`ChunkedReader`]: a TCP stream delivering scripted chunks

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::SocketAddr;

use fieldgate_core::DatagramSource;

/// Default node address used across tests
pub fn node_addr() -> SocketAddr {
    "10.1.2.3:40000".parse().unwrap()
}

/// Datagrams waiting on a fake socket
pub struct DatagramQueue {
    queue: RefCell<VecDeque<(Vec<u8>, SocketAddr)>>,
}

impl DatagramQueue {
    pub fn new() -> Self {
        Self { queue: RefCell::new(VecDeque::new()) }
    }

    pub fn send(&self, from: SocketAddr, datagram: Vec<u8>) {
        self.queue.borrow_mut().push_back((datagram, from));
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl DatagramSource for DatagramQueue {
    fn peek_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let queue = self.queue.borrow();
        let (data, peer) = queue.front().ok_or(io::ErrorKind::WouldBlock)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, *peer))
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (data, peer) = self
            .queue
            .borrow_mut()
            .pop_front()
            .ok_or(io::ErrorKind::WouldBlock)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, peer))
    }
}

/// Stream delivering one scripted chunk per `read`
pub struct ChunkedReader {
    chunks: VecDeque<Vec<u8>>,
    pub eof: bool,
}

impl ChunkedReader {
    pub fn new() -> Self {
        Self { chunks: VecDeque::new(), eof: false }
    }

    /// Split `bytes` at the given offsets into separate reads
    pub fn split_at(bytes: &[u8], cuts: &[usize]) -> Self {
        let mut reader = Self::new();
        let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(bytes.len())) {
            if cut > start {
                reader.push(&bytes[start..cut]);
                start = cut;
            }
        }
        reader
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.chunks.push_back(chunk.to_vec());
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.chunks.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if self.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}
