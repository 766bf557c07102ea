//! Send-side state machine for one connection.
//!
//! [`Sender`] assigns sequence numbers to application data, keeps every
//! segment until it is cumulatively acknowledged, and decides which segments
//! go on the wire at a given instant.  It does **not** touch the channel;
//! [`crate::connection::Connection`] encodes and transmits whatever
//! [`Sender::poll_transmit`] hands back.
//!
//! # Transmission policy
//!
//! - The outbound queue is walked oldest first.  The first segment whose last
//!   byte lies beyond the window ceiling stops the walk: later segments are
//!   never sent ahead of an earlier one (head-of-line blocking).
//! - A segment inside the window that was never sent is sent now.
//! - Only the **oldest** segment is ever retransmitted, and only once more
//!   than `retransmit_timeout` has passed since its last transmission.
//! - A segment may be transmitted at most [`MAX_TRANSMISSIONS`] times; when a
//!   seventh transmission falls due the connection must be aborted.
//!
//! # Sequence-number layout
//!
//! ```text
//!  last_ack_received                      last_seq_written
//!        │                                       │
//!  ──────┼───────────────────────────────┼───────┼──────▶ seq space
//!        │ <──────── send_window ───────▶│
//!        │        (may be in flight)     │ (held back)
//! ```
//!
//! Sequence numbers start at 1 and are compared without wrap-around.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::segment::{flags, Segment};
use crate::store::{OutboundQueue, TrackedSegment};

/// Transmissions allowed per segment, the first one included.
pub const MAX_TRANSMISSIONS: u32 = 6;

/// The oldest outbound segment exhausted its transmissions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("segment seq={seq} unacknowledged after {} transmissions", MAX_TRANSMISSIONS)]
pub struct RetransmitLimitExceeded {
    pub seq: u32,
}

/// Writing more data would run past the last sequence number.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("sequence space exhausted at seq={next}")]
pub struct SequenceExhausted {
    pub next: u32,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct Sender {
    /// Highest cumulative acknowledgement received from the peer.
    pub last_ack_received: u32,
    /// Sequence number assigned to the next byte written by the application.
    pub last_seq_written: u32,
    /// `true` once end-of-input was read and the FIN queued.
    pub eof_sent: bool,

    queue: OutboundQueue,
    send_window: u32,
    retransmit_timeout: Duration,
}

impl Sender {
    /// Create a new [`Sender`].  `send_window` is in bytes and must be ≥ 1.
    pub fn new(send_window: u32, retransmit_timeout: Duration) -> Self {
        assert!(send_window >= 1, "send_window must be at least 1");
        Self {
            last_ack_received: 0,
            last_seq_written: 1,
            eof_sent: false,
            queue: OutboundQueue::new(),
            send_window,
            retransmit_timeout,
        }
    }

    /// Queue `payload` as a new segment and return its sequence number.
    ///
    /// Fails, leaving the queue untouched, when the payload would not fit in
    /// the remaining sequence space.
    pub fn enqueue(&mut self, payload: Vec<u8>) -> Result<u32, SequenceExhausted> {
        debug_assert!(!self.eof_sent, "data enqueued after the FIN");
        debug_assert!(!payload.is_empty(), "empty payloads carry no data");
        let seq = self.last_seq_written;
        self.last_seq_written = u32::try_from(payload.len())
            .ok()
            .and_then(|len| seq.checked_add(len))
            .ok_or(SequenceExhausted { next: seq })?;
        self.queue.push(Segment::with_data(seq, payload));
        Ok(seq)
    }

    /// Queue the end-of-stream marker.  The FIN occupies one sequence number.
    ///
    /// Returns `Ok(None)` when a FIN was already queued.
    pub fn enqueue_fin(&mut self) -> Result<Option<u32>, SequenceExhausted> {
        if self.eof_sent {
            return Ok(None);
        }
        let seq = self.last_seq_written;
        self.last_seq_written = seq.checked_add(1).ok_or(SequenceExhausted { next: seq })?;
        self.queue.push(Segment::fin(seq));
        self.eof_sent = true;
        Ok(Some(seq))
    }

    /// Highest sequence number currently allowed on the wire.
    ///
    /// The window opens at the first unacknowledged byte; before any
    /// acknowledgement arrives that is byte 1, not byte 0.
    pub fn window_ceiling(&self) -> u32 {
        let first_unacked = self.last_ack_received.max(1);
        first_unacked.saturating_add(self.send_window - 1)
    }

    /// Select the segments to transmit at `now`.
    ///
    /// Each returned segment is stamped with `ack`, `window` and the ACK flag
    /// and its transmission is recorded.  The caller is expected to encode
    /// and send all of them.
    pub fn poll_transmit(
        &mut self,
        now: Instant,
        ack: u32,
        window: u16,
    ) -> Result<Vec<Segment>, RetransmitLimitExceeded> {
        let ceiling = self.window_ceiling();
        let rto = self.retransmit_timeout;
        let mut out = Vec::new();

        for (i, entry) in self.queue.iter_mut().enumerate() {
            if entry.last_byte_seq() > ceiling {
                log::trace!(
                    "[send] seq={} blocked: last byte {} beyond window ceiling {}",
                    entry.segment.seq,
                    entry.last_byte_seq(),
                    ceiling
                );
                break;
            }

            if !is_due(entry, i == 0, now, rto) {
                continue;
            }
            if entry.retransmit_count >= MAX_TRANSMISSIONS {
                return Err(RetransmitLimitExceeded {
                    seq: entry.segment.seq,
                });
            }

            entry.segment.ack = ack;
            entry.segment.window = window;
            entry.segment.flags |= flags::ACK;
            entry.mark_sent(now);
            if entry.retransmit_count > 1 {
                log::debug!(
                    "[send] retransmit seq={} attempt {}",
                    entry.segment.seq,
                    entry.retransmit_count
                );
            }
            out.push(entry.segment.clone());
        }
        Ok(out)
    }

    /// Fold a cumulative acknowledgement into the send state.
    ///
    /// The acknowledgement only moves forward.  Returns `true` when it
    /// advanced.  Acknowledgements for bytes never written are ignored.
    pub fn on_ack(&mut self, ack: u32) -> bool {
        if ack > self.last_seq_written {
            log::debug!(
                "[send] ignoring ack={} beyond last written seq {}",
                ack,
                self.last_seq_written
            );
            return false;
        }
        if ack > self.last_ack_received {
            self.last_ack_received = ack;
            return true;
        }
        false
    }

    /// Drop every segment fully covered by `last_ack_received`.
    pub fn purge_acknowledged(&mut self) -> usize {
        self.queue.purge_below(self.last_ack_received)
    }

    /// `true` when at least one segment awaits acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Segments awaiting acknowledgement, oldest first.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Payload bytes that were transmitted at least once and are not yet
    /// acknowledged.
    pub fn bytes_in_flight(&self) -> usize {
        self.queue
            .iter()
            .filter(|e| e.retransmit_count > 0)
            .map(|e| e.segment.payload_len())
            .sum()
    }

    /// Discard every queued segment.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Whether `entry` should be transmitted at `now`.
fn is_due(entry: &TrackedSegment, oldest: bool, now: Instant, rto: Duration) -> bool {
    if entry.retransmit_count == 0 {
        return true;
    }
    match entry.last_sent_at {
        Some(at) => oldest && now.saturating_duration_since(at) > rto,
        None => false,
    }
}
