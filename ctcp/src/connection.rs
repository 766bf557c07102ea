//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one stream.  It reacts to the
//! three external events and nothing else:
//!
//! | Event                  | Method                      |
//! |------------------------|-----------------------------|
//! | application input      | [`Connection::on_input`]    |
//! | datagram from the peer | [`Connection::on_segment`]  |
//! | timer tick             | [`Connection::on_tick`]     |
//!
//! Each method takes `now` explicitly, so the whole engine is deterministic
//! under test.  Callers serialise events per connection (the
//! [`crate::registry::Registry`] does so with a lock).
//!
//! Teardown happens in exactly two ways: the linger timer expires after both
//! directions closed, or the oldest outbound segment exhausts its
//! transmissions.  The latter aborts silently; no reset is sent.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::Config;
use crate::io::{Channel, Input, Sink, Source};
use crate::receiver::{Receiver, RecvStats, Verdict};
use crate::segment::Segment;
use crate::sender::{RetransmitLimitExceeded, Sender, SequenceExhausted};
use crate::state::ConnectionState;

/// Delay between both directions closing and the record being destroyed.
pub const LINGER_PERIOD: Duration = Duration::from_secs(2);

/// Unacknowledged payload bytes above which application input stays unread.
pub const MAX_OUTBOUND_BYTES: usize = 64 * 1024;

/// Errors surfaced by connection events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnError {
    /// The connection was aborted and destroyed.
    #[error("connection aborted: {0}")]
    RetransmitLimit(#[from] RetransmitLimitExceeded),
    /// The application wrote more than one stream can number.
    #[error("connection aborted: {0}")]
    SequenceExhausted(#[from] SequenceExhausted),
    /// The event targeted a connection that no longer exists.
    #[error("connection is closed")]
    Closed,
}

/// Outcome of [`Connection::on_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Alive,
    /// The linger period ran out and the connection was destroyed.
    Destroyed,
}

/// One reliable stream over a datagram channel.
#[derive(Debug)]
pub struct Connection<C, S> {
    state: ConnectionState,
    config: Config,
    sender: Sender,
    receiver: Receiver,
    channel: C,
    sink: S,
    /// Set when both directions are first seen closed and drained.
    close_timer_start: Option<Instant>,
}

impl<C: Channel, S: Sink> Connection<C, S> {
    /// Create a connection over an established channel endpoint.
    ///
    /// `config` is assumed valid; see [`Config::validate`].
    pub fn new(channel: C, sink: S, config: Config) -> Self {
        log::info!(
            "[conn] established: send_window={} recv_window={} rto={:?}",
            config.send_window,
            config.recv_window,
            config.retransmit_timeout
        );
        Self {
            state: ConnectionState::Active,
            config,
            sender: Sender::new(config.send_window, config.retransmit_timeout),
            receiver: Receiver::new(config.recv_window),
            channel,
            sink,
            close_timer_start: None,
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Pull available application input, segment it and try to send.
    ///
    /// Reading stops once [`MAX_OUTBOUND_BYTES`] are awaiting
    /// acknowledgement; the rest stays in `source` for a later call.  Once
    /// end-of-input has been read further calls do nothing.
    pub fn on_input<Src: Source>(&mut self, source: &mut Src, now: Instant) -> Result<(), ConnError> {
        self.ensure_open()?;
        if self.sender.eof_sent {
            return Ok(());
        }

        let mut buf = vec![0u8; self.config.segment_size()];
        while self.sender.queue().bytes() < MAX_OUTBOUND_BYTES {
            let queued = match source.read(&mut buf) {
                Input::Data(0) | Input::Pending => break,
                Input::Data(n) => self.sender.enqueue(buf[..n].to_vec()).map(|seq| {
                    log::trace!("[conn] queued {n} bytes at seq={seq}");
                }),
                Input::Eof => self.sender.enqueue_fin().map(|fin| {
                    if let Some(seq) = fin {
                        log::info!("[conn] local end of input; FIN queued at seq={seq}");
                        self.state = ConnectionState::LocalFinSent;
                    }
                }),
            };
            if let Err(e) = queued {
                log::warn!("[conn] {e}; aborting connection");
                self.destroy();
                return Err(e.into());
            }
            if self.sender.eof_sent {
                break;
            }
        }

        self.send_all(now)
    }

    /// Process one raw datagram from the peer.
    pub fn on_segment(&mut self, raw: &[u8], now: Instant) -> Result<(), ConnError> {
        self.ensure_open()?;

        let ack = match self.receiver.on_datagram(raw) {
            Verdict::Dropped => return Ok(()),
            Verdict::Resync => {
                self.send_ack();
                return Ok(());
            }
            Verdict::Accepted { ack } => ack,
        };

        let advanced = ack.is_some_and(|ack| self.sender.on_ack(ack));
        self.deliver();
        let purged = self.sender.purge_acknowledged();
        if purged > 0 {
            log::debug!(
                "[conn] ack={} released {purged} segment(s)",
                self.sender.last_ack_received
            );
        }

        // An advancing ACK may have opened the window for held-back data.
        if advanced {
            self.send_all(now)?;
        }
        Ok(())
    }

    /// Periodic driver: deliver, (re)transmit, and run the close timer.
    pub fn on_tick(&mut self, now: Instant) -> Result<Tick, ConnError> {
        self.ensure_open()?;

        self.deliver();
        self.send_all(now)?;

        if !self.is_drained() {
            return Ok(Tick::Alive);
        }
        match self.close_timer_start {
            None => {
                self.close_timer_start = Some(now);
                self.state = ConnectionState::Lingering;
                log::info!("[conn] both directions closed; lingering for {LINGER_PERIOD:?}");
            }
            Some(start) if now.saturating_duration_since(start) > LINGER_PERIOD => {
                self.destroy();
                return Ok(Tick::Destroyed);
            }
            Some(_) => {}
        }
        Ok(Tick::Alive)
    }

    /// Release the channel and drop all queued segments.  Idempotent.
    pub fn destroy(&mut self) {
        if self.state.is_closed() {
            return;
        }
        let stats = self.receiver.stats;
        log::info!(
            "[conn] destroyed: {} unacked, {} undelivered, truncated={} bad_checksum={} \
             out_of_window={} duplicate={}",
            self.sender.queue().len(),
            self.receiver.queue().len(),
            stats.truncated,
            stats.bad_checksum,
            stats.out_of_window,
            stats.duplicate
        );
        self.channel.close();
        self.sender.clear();
        self.receiver.clear();
        self.state = ConnectionState::Destroyed;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn stats(&self) -> RecvStats {
        self.receiver.stats
    }

    pub fn close_timer_start(&self) -> Option<Instant> {
        self.close_timer_start
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), ConnError> {
        if self.state.is_closed() {
            Err(ConnError::Closed)
        } else {
            Ok(())
        }
    }

    /// Local EOF sent, remote FIN received, nothing left in either queue.
    fn is_drained(&self) -> bool {
        self.sender.eof_sent
            && self.receiver.fin_received
            && !self.sender.has_unacked()
            && self.receiver.queue().is_empty()
    }

    /// Deliver what the receiver can and acknowledge if anything moved.
    fn deliver(&mut self) {
        if self.receiver.deliver(&mut self.sink) > 0 {
            self.send_ack();
        }
    }

    /// Transmit every segment the send window allows; abort on the limit.
    fn send_all(&mut self, now: Instant) -> Result<(), ConnError> {
        let ack = self.receiver.ack_number();
        let window = self.receiver.advertised_window();
        match self.sender.poll_transmit(now, ack, window) {
            Ok(segments) => {
                for segment in &segments {
                    self.transmit(segment);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("[conn] {e}; aborting connection");
                self.destroy();
                Err(e.into())
            }
        }
    }

    fn send_ack(&mut self) {
        let ack = Segment::ack_only(self.receiver.ack_number(), self.receiver.advertised_window());
        self.transmit(&ack);
    }

    /// Encode and hand one segment to the channel.  Failures are treated as
    /// loss: the retransmit timer covers them.
    fn transmit(&mut self, segment: &Segment) {
        let bytes = match segment.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("[conn] cannot encode {segment}: {e}");
                return;
            }
        };
        match self.channel.send(&bytes) {
            Ok(n) if n < bytes.len() => {
                log::warn!("[conn] short send: {n} of {} bytes", bytes.len());
            }
            Ok(_) => log::debug!("[conn] → {segment}"),
            Err(e) => log::warn!("[conn] send failed for {segment}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryChannel, MemorySink, MemorySource};
    use crate::segment::MAX_SEGMENT_DATA;
    use crate::sender::MAX_TRANSMISSIONS;

    type TestConn = Connection<MemoryChannel, MemorySink>;

    fn conn() -> TestConn {
        Connection::new(MemoryChannel::new(), MemorySink::unbounded(), Config::default())
    }

    fn decode_all(conn: &mut TestConn) -> Vec<Segment> {
        conn.channel_mut()
            .drain()
            .iter()
            .map(|raw| Segment::decode(raw).unwrap())
            .collect()
    }

    #[test]
    fn input_is_sent_immediately() {
        let mut c = conn();
        let mut src = MemorySource::new();
        src.push(b"hello");
        c.on_input(&mut src, Instant::now()).unwrap();

        let sent = decode_all(&mut c);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seq, 1);
        assert_eq!(sent[0].ack, 1);
        assert_eq!(sent[0].data, b"hello");
        assert_eq!(c.state(), ConnectionState::Active);
    }

    #[test]
    fn large_input_is_split_into_segments() {
        let mut c = Connection::new(
            MemoryChannel::new(),
            MemorySink::unbounded(),
            Config {
                send_window: 100_000,
                ..Config::default()
            },
        );
        let mut src = MemorySource::new();
        src.push(&vec![1u8; 3000]);
        c.on_input(&mut src, Instant::now()).unwrap();

        let lens: Vec<usize> = decode_all(&mut c).iter().map(|s| s.data.len()).collect();
        assert_eq!(lens, vec![1440, 1440, 120]);
        assert_eq!(c.sender().last_seq_written, 3001);
    }

    #[test]
    fn bulk_input_is_read_only_up_to_the_outbound_cap() {
        let mut c = conn();
        let total = 8 * 1024 * 1024;
        let mut src = MemorySource::new();
        src.push(&vec![0u8; total]);
        let t0 = Instant::now();
        c.on_input(&mut src, t0).unwrap();

        let queued = c.sender().queue().bytes();
        assert!(queued >= MAX_OUTBOUND_BYTES);
        assert!(queued < MAX_OUTBOUND_BYTES + MAX_SEGMENT_DATA);
        assert_eq!(src.len(), total - queued);

        // Repeated input events take nothing while the queue is full.
        c.on_input(&mut src, t0).unwrap();
        assert_eq!(src.len(), total - queued);

        // Acknowledging the first segment frees room for one more.
        let ack = Segment::ack_only(1 + MAX_SEGMENT_DATA as u32, 1440);
        c.on_segment(&ack.encode().unwrap(), t0).unwrap();
        c.on_input(&mut src, t0).unwrap();
        assert_eq!(c.sender().queue().bytes(), queued);
        assert_eq!(src.len(), total - queued - MAX_SEGMENT_DATA);
    }

    #[test]
    fn input_past_the_sequence_space_aborts() {
        let mut c = conn();
        c.sender.last_seq_written = u32::MAX - 10;
        let mut src = MemorySource::new();
        src.push(&[0u8; 100]);

        assert!(matches!(
            c.on_input(&mut src, Instant::now()),
            Err(ConnError::SequenceExhausted(_))
        ));
        assert!(c.state().is_closed());
        assert!(c.channel().is_closed());
        assert_eq!(c.channel().pending(), 0);
    }

    #[test]
    fn eof_queues_fin_and_changes_state() {
        let mut c = conn();
        let mut src = MemorySource::closed_with(b"abc");
        c.on_input(&mut src, Instant::now()).unwrap();
        assert_eq!(c.state(), ConnectionState::LocalFinSent);

        let sent = decode_all(&mut c);
        assert_eq!(sent.len(), 2);
        assert!(sent[1].is_fin());
        assert_eq!(sent[1].seq, 4);

        // Further input events are ignored.
        c.on_input(&mut src, Instant::now()).unwrap();
        assert_eq!(c.channel().pending(), 0);
    }

    #[test]
    fn delivery_triggers_an_ack() {
        let mut c = conn();
        let raw = Segment::with_data(1, b"data".to_vec()).encode().unwrap();
        c.on_segment(&raw, Instant::now()).unwrap();

        assert_eq!(c.sink().received(), b"data");
        let sent = decode_all(&mut c);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_ack());
        assert_eq!(sent[0].ack, 5);
        assert!(sent[0].data.is_empty());
    }

    #[test]
    fn out_of_window_segment_gets_resync_ack() {
        let mut c = conn();
        let raw = Segment::with_data(5000, b"far".to_vec()).encode().unwrap();
        c.on_segment(&raw, Instant::now()).unwrap();
        assert_eq!(c.stats().out_of_window, 1);
        let sent = decode_all(&mut c);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ack, 1);
    }

    #[test]
    fn retransmit_limit_destroys_connection() {
        let mut c = conn();
        let mut src = MemorySource::new();
        src.push(b"lost");
        let mut now = Instant::now();
        c.on_input(&mut src, now).unwrap();

        let step = c.config().retransmit_timeout + Duration::from_millis(1);
        for _ in 1..MAX_TRANSMISSIONS {
            now += step;
            assert_eq!(c.on_tick(now), Ok(Tick::Alive));
        }
        assert_eq!(c.channel_mut().drain().len(), MAX_TRANSMISSIONS as usize);

        now += step;
        assert!(matches!(c.on_tick(now), Err(ConnError::RetransmitLimit(_))));
        assert_eq!(c.state(), ConnectionState::Destroyed);
        assert!(c.channel().is_closed());
        assert!(!c.sender().has_unacked());
        assert_eq!(c.on_tick(now), Err(ConnError::Closed));
    }

    #[test]
    fn linger_starts_once_both_sides_closed() {
        let mut c = conn();
        let t0 = Instant::now();
        c.on_input(&mut MemorySource::closed_with(b""), t0).unwrap();
        // Our FIN (seq 1) acknowledged, and the peer's FIN (seq 1) arrives.
        let mut peer_fin = Segment::fin(1);
        peer_fin.flags |= crate::segment::flags::ACK;
        peer_fin.ack = 2;
        c.on_segment(&peer_fin.encode().unwrap(), t0).unwrap();
        assert!(c.receiver().fin_received);
        assert!(!c.sender().has_unacked());

        assert_eq!(c.on_tick(t0), Ok(Tick::Alive));
        assert_eq!(c.state(), ConnectionState::Lingering);
        assert_eq!(c.close_timer_start(), Some(t0));

        assert_eq!(c.on_tick(t0 + LINGER_PERIOD), Ok(Tick::Alive));
        assert_eq!(
            c.on_tick(t0 + LINGER_PERIOD + Duration::from_millis(1)),
            Ok(Tick::Destroyed)
        );
        assert!(c.state().is_closed());
    }

    #[test]
    fn events_after_destroy_are_rejected() {
        let mut c = conn();
        c.destroy();
        c.destroy();
        assert_eq!(
            c.on_input(&mut MemorySource::new(), Instant::now()),
            Err(ConnError::Closed)
        );
        assert_eq!(c.on_segment(&[], Instant::now()), Err(ConnError::Closed));
    }
}
