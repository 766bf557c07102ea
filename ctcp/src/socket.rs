//! Async UDP socket and the real-world collaborator implementations.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagrams.  Framing and validation happen in the connection, because a
//! damaged datagram is a protocol event rather than an I/O failure.
//!
//! [`UdpChannel`] and [`WriteSink`] adapt the socket and any
//! [`std::io::Write`] to the engine's [`Channel`] and [`Sink`] traits.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::io::{Channel, Sink};

/// Largest datagram the receive path accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// Bytes a [`WriteSink`] claims it can take per delivery.
pub const WRITE_SINK_SPACE: usize = 64 * 1024;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` and the inner socket is shared with every
/// [`UdpChannel`] created from it.
#[derive(Debug, Clone)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: Arc<UdpSocket>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| SocketError::Bind {
                addr: local_addr,
                source,
            })?;
        let local_addr = inner.local_addr()?;
        // Channels send with try_send_to, which needs known write readiness.
        inner.writable().await?;
        log::debug!("[socket] bound {local_addr}");
        Ok(Self {
            local_addr,
            inner: Arc::new(inner),
        })
    }

    /// Receive the next datagram into `buf`.
    ///
    /// Returns `(length, sender_address)`.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf).await?)
    }

    /// A channel that sends every datagram to `peer` through this socket.
    pub fn channel_to(&self, peer: SocketAddr) -> UdpChannel {
        UdpChannel {
            socket: Arc::clone(&self.inner),
            peer,
            open: true,
        }
    }
}

/// Connection-bound sending half of a [`Socket`].
#[derive(Debug)]
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    open: bool,
}

impl UdpChannel {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Channel for UdpChannel {
    // A full send buffer surfaces as WouldBlock; the segment is then treated
    // like one lost on the wire.
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        self.socket.try_send_to(datagram, self.peer)
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Delivers the byte stream to any blocking writer, typically stdout.
#[derive(Debug)]
pub struct WriteSink<W> {
    writer: W,
    finished: bool,
}

impl<W: Write> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            finished: false,
        }
    }

    /// Whether the peer's end-of-stream has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriteSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Sink for WriteSink<W> {
    fn bufspace(&self) -> usize {
        if self.finished {
            0
        } else {
            WRITE_SINK_SPACE
        }
    }

    fn output(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn end_of_stream(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("[sink] flush on end of stream failed: {e}");
        }
        self.finished = true;
        log::info!("[sink] peer closed the stream");
    }
}
