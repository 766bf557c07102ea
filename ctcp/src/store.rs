//! Ordered segment containers shared by the send and receive engines.
//!
//! - [`OutboundQueue`] holds [`TrackedSegment`]s in the order they were
//!   written by the application.  Because sequence numbers are assigned at
//!   enqueue time, that order is also ascending sequence order, so trimming
//!   acknowledged data is a prefix pop.
//! - [`InboundQueue`] holds received segments awaiting in-order delivery,
//!   kept sorted by sequence number with exact duplicates suppressed.
//!
//! Both are thin wrappers over [`VecDeque`]; the wrappers exist to keep the
//! ordering invariants in one place.

use std::collections::VecDeque;
use std::time::Instant;

use crate::segment::Segment;

// ---------------------------------------------------------------------------
// TrackedSegment
// ---------------------------------------------------------------------------

/// An outbound segment plus its transmission bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSegment {
    /// The segment as written by the application; ack fields are restamped
    /// on every transmission.
    pub segment: Segment,
    /// Total number of times this segment has been put on the wire.
    pub retransmit_count: u32,
    /// Time of the most recent transmission, `None` until the first one.
    pub last_sent_at: Option<Instant>,
}

impl TrackedSegment {
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            retransmit_count: 0,
            last_sent_at: None,
        }
    }

    pub fn last_byte_seq(&self) -> u32 {
        self.segment.last_byte_seq()
    }

    /// Record one transmission at `now`.
    pub fn mark_sent(&mut self, now: Instant) {
        self.retransmit_count += 1;
        self.last_sent_at = Some(now);
    }
}

// ---------------------------------------------------------------------------
// OutboundQueue
// ---------------------------------------------------------------------------

/// Not-yet-acknowledged segments, oldest first.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<TrackedSegment>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: Segment) {
        debug_assert!(
            self.entries
                .back()
                .map_or(true, |last| last.segment.seq < segment.seq),
            "outbound segments must be pushed in sequence order"
        );
        self.entries.push_back(TrackedSegment::new(segment));
    }

    pub fn front(&self) -> Option<&TrackedSegment> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedSegment> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedSegment> {
        self.entries.iter_mut()
    }

    /// Pop every leading segment whose last byte lies strictly below
    /// `ack`, returning how many were removed.
    pub fn purge_below(&mut self, ack: u32) -> usize {
        let before = self.entries.len();
        while self
            .entries
            .front()
            .is_some_and(|entry| entry.last_byte_seq() < ack)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payload bytes currently queued.
    pub fn bytes(&self) -> usize {
        self.entries.iter().map(|e| e.segment.payload_len()).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// InboundQueue
// ---------------------------------------------------------------------------

/// Outcome of [`InboundQueue::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The segment took a new slot in the ordering.
    Queued,
    /// A segment with the same sequence number was already queued.
    Duplicate,
}

/// Received segments awaiting delivery, sorted by sequence number.
#[derive(Debug, Default)]
pub struct InboundQueue {
    segments: VecDeque<Segment>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `segment` at its ordered position.
    ///
    /// A segment whose sequence number exactly matches a queued one is
    /// discarded and reported as [`Insert::Duplicate`].
    pub fn insert(&mut self, segment: Segment) -> Insert {
        match self.segments.binary_search_by_key(&segment.seq, |s| s.seq) {
            Ok(_) => Insert::Duplicate,
            Err(pos) => {
                self.segments.insert(pos, segment);
                Insert::Queued
            }
        }
    }

    pub fn front(&self) -> Option<&Segment> {
        self.segments.front()
    }

    pub fn pop_front(&mut self) -> Option<Segment> {
        self.segments.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Payload bytes currently buffered.
    pub fn bytes(&self) -> usize {
        self.segments.iter().map(Segment::payload_len).sum()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }
}
