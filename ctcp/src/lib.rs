//! `ctcp`: a reliable, ordered byte stream over an unreliable datagram channel.
//!
//! # Architecture
//!
//! ```text
//!   app input (Source)                         app output (Sink)
//!        │                                            ▲
//!  ┌─────▼────┐   segments   ┌──────────┐   deliver   │
//!  │  Sender  │─────────────▶│ Receiver │─────────────┘
//!  └────┬─────┘              └─────┬────┘
//!       │        ACKs              │
//!       │◀─────────────────────────┘
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │  sans-IO state machine
//!  └────┬──────────────────────────────┘
//!  ┌────▼──────┐  ┌─────────┐
//!  │ Registry  │◀─│ Ticker  │  periodic retransmit + linger sweep
//!  └────┬──────┘  └─────────┘
//!       │ raw datagrams (Channel)
//!  ┌────▼──────┐
//!  │  Socket   │  thin async wrapper around tokio UdpSocket
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`checksum`]: 16-bit ones'-complement checksum
//! - [`segment`]: wire format (encode / decode / validate)
//! - [`store`]: ordered outbound and inbound segment queues
//! - [`io`]: channel, source and sink traits plus in-memory versions
//! - [`sender`]: windowed transmission and oldest-first retransmission
//! - [`receiver`]: validation, ordered insertion and delivery
//! - [`state`]: lifecycle states
//! - [`config`]: per-connection parameters
//! - [`connection`]: per-connection event handling and teardown
//! - [`registry`]: all live connections and the timer sweep
//! - [`timer`]: tick source for the sweep
//! - [`socket`]: async UDP socket, UDP channel and writer sink
//! - [`endpoint`]: client/server event loop over stdin and stdout
//! - [`simulator`]: seeded lossy link for tests

pub mod checksum;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod io;
pub mod receiver;
pub mod registry;
pub mod segment;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod store;
pub mod timer;

pub use config::Config;
pub use connection::{ConnError, Connection};
pub use registry::{ConnId, Registry};
pub use segment::Segment;
