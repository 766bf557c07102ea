//! Collaborator interfaces consumed by the protocol engine.
//!
//! The engine never performs I/O on its own.  Instead a
//! [`crate::connection::Connection`] is generic over three small traits:
//!
//! | Trait       | Direction            | Real implementation              |
//! |-------------|----------------------|----------------------------------|
//! | [`Channel`] | segments to the peer | [`crate::socket::UdpChannel`]    |
//! | [`Source`]  | bytes from the app   | [`MemorySource`] fed from stdin  |
//! | [`Sink`]    | bytes to the app     | [`crate::socket::WriteSink`]     |
//!
//! All calls are non-blocking.  The in-memory implementations in this module
//! back the test suite and the stdin bridge of the binary.

use std::collections::VecDeque;
use std::io;

/// Outbound datagram primitive.
pub trait Channel {
    /// Transmit one fully framed segment, returning the bytes actually sent.
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize>;

    /// Release the endpoint.  Called exactly once, on connection teardown.
    fn close(&mut self) {}
}

/// Result of a non-blocking read from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
    /// Nothing available right now.
    Pending,
    /// The application will never produce more input.
    Eof,
}

/// Application byte source.
pub trait Source {
    fn read(&mut self, buf: &mut [u8]) -> Input;
}

/// Application byte sink.
pub trait Sink {
    /// Bytes the sink can accept right now.
    fn bufspace(&self) -> usize;

    /// Hand `data` to the application.  Callers check [`Sink::bufspace`]
    /// first, so a short write is an error.
    fn output(&mut self, data: &[u8]) -> io::Result<()>;

    /// Signal that the peer closed its direction of the stream.
    fn end_of_stream(&mut self);
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Records every datagram handed to it.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    outbox: VecDeque<Vec<u8>>,
    closed: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every datagram sent so far, oldest first.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.outbox.drain(..).collect()
    }

    /// Number of datagrams waiting in the outbox.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        self.outbox.push_back(datagram.to_vec());
        Ok(datagram.len())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// A byte pipe: the producer pushes chunks, the connection reads them.
#[derive(Debug, Default)]
pub struct MemorySource {
    buffered: VecDeque<u8>,
    eof: bool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that yields `data` and then end-of-input.
    pub fn closed_with(data: &[u8]) -> Self {
        let mut source = Self::new();
        source.push(data);
        source.close();
        source
    }

    pub fn push(&mut self, data: &[u8]) {
        debug_assert!(!self.eof, "push after close");
        self.buffered.extend(data);
    }

    /// Mark end-of-input; reported once the buffer drains.
    pub fn close(&mut self) {
        self.eof = true;
    }

    pub fn is_closed(&self) -> bool {
        self.eof
    }

    /// Bytes pushed but not yet read.
    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }
}

impl Source for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Input {
        if self.buffered.is_empty() {
            return if self.eof { Input::Eof } else { Input::Pending };
        }
        let n = buf.len().min(self.buffered.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.buffered.drain(..n)) {
            *dst = src;
        }
        Input::Data(n)
    }
}

/// Collects delivered bytes up to a fixed capacity.
///
/// Delivered bytes count against the capacity until the test (playing the
/// application) calls [`MemorySink::consume`].
#[derive(Debug)]
pub struct MemorySink {
    received: Vec<u8>,
    unread: usize,
    capacity: usize,
    eof_signals: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            received: Vec::new(),
            unread: 0,
            capacity,
            eof_signals: 0,
        }
    }

    /// An effectively unbounded sink.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Everything delivered so far, in delivery order.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// Mark all delivered bytes as read, freeing buffer space.
    pub fn consume(&mut self) {
        self.unread = 0;
    }

    /// How many times end-of-stream was signalled.
    pub fn eof_signals(&self) -> usize {
        self.eof_signals
    }
}

impl Sink for MemorySink {
    fn bufspace(&self) -> usize {
        self.capacity.saturating_sub(self.unread)
    }

    fn output(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() > self.bufspace() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "sink full"));
        }
        self.received.extend_from_slice(data);
        self.unread += data.len();
        Ok(())
    }

    fn end_of_stream(&mut self) {
        self.eof_signals += 1;
    }
}
