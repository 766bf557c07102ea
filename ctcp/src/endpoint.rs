//! Event loop tying the engine to a UDP socket, stdin and stdout.
//!
//! One endpoint carries exactly one connection.  A client knows its peer up
//! front; a server adopts the first address that sends it a datagram and
//! ignores everyone else.  The loop multiplexes three event sources with
//! `tokio::select!`:
//!
//! - datagrams from the socket, dispatched as segments,
//! - application input, buffered in a [`MemorySource`] pipe,
//! - ticks from the [`Ticker`], which drive retransmission and linger.
//!
//! The loop returns once the connection is destroyed.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{Config, ConfigError};
use crate::connection::{ConnError, Connection};
use crate::io::MemorySource;
use crate::registry::{ConnId, Registry, Teardown};
use crate::socket::{Socket, SocketError, UdpChannel, WriteSink, MAX_DATAGRAM};
use crate::timer::Ticker;

const INPUT_CHUNK: usize = 4096;

/// Input read ahead of the connection; reading pauses above this.
const MAX_PIPE_BYTES: usize = 64 * 1024;

/// Which side of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bind `bind` and send to `server`.
    Client { server: SocketAddr, bind: SocketAddr },
    /// Bind `bind` and wait for a client.
    Server { bind: SocketAddr },
}

impl Mode {
    fn bind_addr(&self) -> SocketAddr {
        match *self {
            Mode::Client { bind, .. } | Mode::Server { bind } => bind,
        }
    }

    fn peer(&self) -> Option<SocketAddr> {
        match *self {
            Mode::Client { server, .. } => Some(server),
            Mode::Server { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("reading input: {0}")]
    Input(#[source] std::io::Error),
    #[error("connection aborted: {0}")]
    Aborted(#[from] ConnError),
}

/// Run a stdin/stdout endpoint until its connection closes.
pub async fn run(mode: Mode, config: Config) -> Result<(), EndpointError> {
    config.validate()?;
    let socket = Socket::bind(mode.bind_addr()).await?;
    log::info!("[endpoint] listening on {}", socket.local_addr);
    serve(
        socket,
        mode.peer(),
        config,
        tokio::io::stdin(),
        std::io::stdout(),
    )
    .await
}

/// Drive one connection over `socket` with arbitrary input and output.
///
/// With `peer` set the connection exists immediately; otherwise it is
/// created for the first address that sends a datagram.
pub async fn serve<R, W>(
    socket: Socket,
    peer: Option<SocketAddr>,
    config: Config,
    mut input: R,
    output: W,
) -> Result<(), EndpointError>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    config.validate()?;

    let registry: Registry<UdpChannel, WriteSink<W>> = Registry::new();
    let mut output = Some(WriteSink::new(output));
    let mut conn: Option<(ConnId, SocketAddr)> = None;
    if let Some(peer) = peer {
        conn = establish(&registry, &socket, peer, &mut output, config);
    }

    let mut pipe = MemorySource::new();
    let mut input_open = true;
    let mut ticker = Ticker::new(config.tick);
    let mut datagram = vec![0u8; MAX_DATAGRAM];
    let mut chunk = vec![0u8; INPUT_CHUNK];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut datagram) => {
                let (n, from) = match received {
                    Ok(r) => r,
                    // ICMP errors from an unreachable peer surface here.
                    Err(e) => {
                        log::debug!("[endpoint] receive failed: {e}");
                        continue;
                    }
                };
                let id = match conn {
                    Some((id, addr)) if addr == from => id,
                    Some(_) => {
                        log::warn!("[endpoint] ignoring datagram from stranger {from}");
                        continue;
                    }
                    None => match establish(&registry, &socket, from, &mut output, config) {
                        Some(established) => {
                            conn = Some(established);
                            established.0
                        }
                        None => continue,
                    },
                };
                registry.on_segment(id, &datagram[..n], Instant::now())?;
            }

            read = input.read(&mut chunk), if input_open && pipe.len() < MAX_PIPE_BYTES => {
                match read.map_err(EndpointError::Input)? {
                    0 => {
                        log::debug!("[endpoint] input exhausted");
                        pipe.close();
                        input_open = false;
                    }
                    n => pipe.push(&chunk[..n]),
                }
                if let Some((id, _)) = conn {
                    registry.on_input(id, &mut pipe, Instant::now())?;
                }
            }

            now = ticker.tick() => {
                // Input held back by a full outbound queue, or that arrived
                // before a server learned its peer.
                if let Some((id, _)) = conn {
                    registry.on_input(id, &mut pipe, now)?;
                }
                for (id, teardown) in registry.tick(now) {
                    match teardown {
                        Teardown::Graceful => log::info!("[endpoint] {id} finished"),
                        Teardown::Aborted(e) => return Err(e.into()),
                    }
                }
            }
        }

        if let Some((id, _)) = conn {
            if !registry.contains(id) {
                return Ok(());
            }
        }
    }
}

fn establish<W: Write>(
    registry: &Registry<UdpChannel, WriteSink<W>>,
    socket: &Socket,
    peer: SocketAddr,
    output: &mut Option<WriteSink<W>>,
    config: Config,
) -> Option<(ConnId, SocketAddr)> {
    let sink = output.take()?;
    let conn = Connection::new(socket.channel_to(peer), sink, config);
    let id = registry.insert(conn);
    log::info!("[endpoint] {id} with {peer}");
    Some((id, peer))
}
