//! Inbound segment validation, reassembly and in-order delivery.
//!
//! The [`Receiver`] is responsible for everything that happens between a raw
//! datagram arriving and the application receiving contiguous bytes:
//! - Rejecting truncated and corrupted datagrams.
//! - Checking that data falls within the receive window.
//! - Buffering out-of-order segments until the gap before them is filled.
//! - Delivering in-order data (and end-of-stream, once) to the [`Sink`].
//! - Computing the ACK number and advertised window for outbound segments.
//! - Detecting and discarding duplicate segments.
//!
//! The [`Receiver`] does **not** send ACKs itself; the [`Verdict`] and the
//! return value of [`Receiver::deliver`] tell
//! [`crate::connection::Connection`] when one is owed.

use crate::io::Sink;
use crate::segment::{Segment, SegmentError};
use crate::store::{InboundQueue, Insert};

/// Diagnostic counters.  They never influence protocol behaviour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecvStats {
    /// Datagrams shorter than their header or declared length.
    pub truncated: u32,
    /// Datagrams whose checksum did not verify.
    pub bad_checksum: u32,
    /// Data segments outside the receive window.
    pub out_of_window: u32,
    /// Segments already queued or already delivered.
    pub duplicate: u32,
}

/// What the connection must do after [`Receiver::on_datagram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Unusable datagram; nothing further happens.
    Dropped,
    /// The segment was refused; reply with an immediate ACK so a sender that
    /// drifted out of step learns our current state.
    Resync,
    /// The segment passed validation.  `ack` carries its cumulative
    /// acknowledgement when the ACK flag was set.
    Accepted { ack: Option<u32> },
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver {
    /// Highest sequence number handed to the application, contiguously.
    pub last_seq_delivered: u32,
    /// `true` once the peer's FIN was delivered as end-of-stream.
    pub fin_received: bool,
    /// Diagnostic counters.
    pub stats: RecvStats,

    inbound: InboundQueue,
    recv_window: u32,
}

impl Receiver {
    /// Create a new [`Receiver`].  `recv_window` is in bytes and must be ≥ 1.
    pub fn new(recv_window: u32) -> Self {
        assert!(recv_window >= 1, "recv_window must be at least 1");
        Self {
            last_seq_delivered: 0,
            fin_received: false,
            stats: RecvStats::default(),
            inbound: InboundQueue::new(),
            recv_window,
        }
    }

    /// Cumulative ACK number for outbound segments: the next byte expected.
    pub fn ack_number(&self) -> u32 {
        self.last_seq_delivered.wrapping_add(1)
    }

    /// Buffer capacity advertised to the peer.
    pub fn advertised_window(&self) -> u16 {
        let free = (self.recv_window as usize).saturating_sub(self.inbound.bytes());
        u16::try_from(free).unwrap_or(u16::MAX)
    }

    /// Validate one raw datagram and queue it for delivery.
    pub fn on_datagram(&mut self, raw: &[u8]) -> Verdict {
        let segment = match Segment::decode(raw) {
            Ok(segment) => segment,
            Err(e @ SegmentError::ChecksumFailed { .. }) => {
                self.stats.bad_checksum += 1;
                log::warn!("[recv] dropping segment: {e}");
                return Verdict::Dropped;
            }
            Err(e) => {
                self.stats.truncated += 1;
                log::warn!("[recv] dropping segment: {e}");
                return Verdict::Dropped;
            }
        };
        log::debug!("[recv] ← {segment}");

        let smallest = u64::from(self.ack_number());
        if segment.payload_len() > 0 {
            let largest = smallest + u64::from(self.recv_window) - 1;
            let first = u64::from(segment.seq);
            let last = first + segment.payload_len() as u64 - 1;
            if first < smallest || last > largest {
                self.stats.out_of_window += 1;
                log::debug!(
                    "[recv] seq={} out of window [{smallest}, {largest}]",
                    segment.seq
                );
                return Verdict::Resync;
            }
        } else if segment.is_fin() && u64::from(segment.seq) < smallest {
            // The FIN was already delivered; its ACK must have been lost.
            self.stats.duplicate += 1;
            log::debug!("[recv] retransmitted FIN seq={}", segment.seq);
            return Verdict::Resync;
        }

        let ack = segment.is_ack().then_some(segment.ack);

        if segment.payload_len() > 0 || segment.is_fin() {
            let seq = segment.seq;
            if self.inbound.insert(segment) == Insert::Duplicate {
                self.stats.duplicate += 1;
                log::debug!("[recv] duplicate seq={seq} discarded");
            }
        }

        Verdict::Accepted { ack }
    }

    /// Hand every contiguous queued segment to `sink`.
    ///
    /// Stops at the first hole or when `sink` lacks room for a whole
    /// payload; both resume on a later call.  Returns the number of segments
    /// delivered; a non-zero value means an ACK is owed.
    pub fn deliver<S: Sink>(&mut self, sink: &mut S) -> usize {
        let mut delivered = 0;

        loop {
            let expected = self.last_seq_delivered.wrapping_add(1);
            let Some(front) = self.inbound.front() else {
                break;
            };

            if front.seq < expected {
                // Overlaps data already delivered.
                self.inbound.pop_front();
                self.stats.duplicate += 1;
                continue;
            }
            if front.seq != expected {
                break;
            }

            let len = front.payload_len();
            if len > 0 {
                if sink.bufspace() < len {
                    log::trace!("[recv] sink full, holding seq={}", front.seq);
                    break;
                }
                if let Err(e) = sink.output(&front.data) {
                    log::warn!("[recv] sink refused seq={}: {e}", front.seq);
                    break;
                }
                self.last_seq_delivered = self.last_seq_delivered.wrapping_add(len as u32);
            }

            if front.is_fin() && !self.fin_received {
                self.fin_received = true;
                self.last_seq_delivered = self.last_seq_delivered.wrapping_add(1);
                sink.end_of_stream();
                log::info!("[recv] end of stream from peer");
            }

            self.inbound.pop_front();
            delivered += 1;
        }

        delivered
    }

    /// Segments received but not yet delivered, lowest sequence first.
    pub fn queue(&self) -> &InboundQueue {
        &self.inbound
    }

    /// Discard every queued segment.
    pub fn clear(&mut self) {
        self.inbound.clear();
    }
}
