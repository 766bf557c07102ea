//! Connection lifecycle states.
//!
//! The protocol has no opening handshake: a connection is `Active` from the
//! moment its channel endpoint exists.  Closing is driven by the two
//! end-of-stream signals and a linger period.
//!
//! ```text
//!  ACTIVE ──local EOF──▶ LOCAL_FIN_SENT ──peer FIN + queues drained──▶ LINGERING
//!    │                        │                                          │
//!    │   retransmit limit     │                            2 s elapsed   │
//!    └────────────────────────┴──────────────▶ DESTROYED ◀───────────────┘
//! ```
//!
//! Transitions are applied by [`crate::connection::Connection`].

/// All possible states of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Data may flow in both directions.  The peer may already have closed
    /// its direction.
    #[default]
    Active,
    /// Local end-of-input was read and the FIN queued; waiting for the peer's
    /// FIN and for both queues to drain.
    LocalFinSent,
    /// Both directions closed and drained; waiting out the linger period so
    /// late retransmissions from the peer still get acknowledged.
    Lingering,
    /// Resources released.  Terminal.
    Destroyed,
}

impl ConnectionState {
    pub fn is_closed(self) -> bool {
        self == Self::Destroyed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::LocalFinSent => "LOCAL_FIN_SENT",
            Self::Lingering => "LINGERING",
            Self::Destroyed => "DESTROYED",
        };
        f.write_str(name)
    }
}
