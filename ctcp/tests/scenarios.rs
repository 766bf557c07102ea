//! End-to-end exchanges between two connections over in-memory channels.
//!
//! Time is passed explicitly, so retransmission and linger behaviour is
//! exercised without sleeping.  Datagrams only move when a test pumps them,
//! which lets individual segments be dropped or replayed on purpose.

use std::time::{Duration, Instant};

use ctcp::config::Config;
use ctcp::connection::{Connection, LINGER_PERIOD};
use ctcp::io::{MemoryChannel, MemorySink, MemorySource};
use ctcp::registry::{Registry, Teardown};
use ctcp::segment::{Segment, HEADER_LEN};
use ctcp::state::ConnectionState;

type Conn = Connection<MemoryChannel, MemorySink>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conn_with(config: Config) -> Conn {
    Connection::new(MemoryChannel::new(), MemorySink::unbounded(), config)
}

fn conn() -> Conn {
    conn_with(Config::default())
}

fn just_past_rto(config: &Config) -> Duration {
    config.retransmit_timeout + Duration::from_millis(1)
}

/// Move every datagram `from` has sent into `to`.  Returns how many moved.
fn pump(from: &mut Conn, to: &mut Conn, now: Instant) -> usize {
    let raws = from.channel_mut().drain();
    for raw in &raws {
        to.on_segment(raw, now).expect("peer accepts segment");
    }
    raws.len()
}

/// Pump in both directions until neither side has anything to say.
fn settle(a: &mut Conn, b: &mut Conn, now: Instant) {
    while pump(a, b, now) + pump(b, a, now) > 0 {}
}

fn sent(conn: &mut Conn) -> Vec<Segment> {
    conn.channel_mut()
        .drain()
        .iter()
        .map(|raw| Segment::decode(raw).expect("well-formed segment"))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// 100 bytes at sequence 1 are delivered, acked at 101 and purged.
#[test]
fn single_segment_delivered_and_acknowledged() {
    let (mut a, mut b) = (conn(), conn());
    let now = Instant::now();
    let payload: Vec<u8> = (0..100u8).collect();

    let mut src = MemorySource::new();
    src.push(&payload);
    a.on_input(&mut src, now).unwrap();
    assert_eq!(a.sender().queue().len(), 1);

    assert_eq!(pump(&mut a, &mut b, now), 1);
    assert_eq!(b.sink().received(), &payload[..]);
    assert_eq!(b.receiver().ack_number(), 101);

    let acks = sent(&mut b);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].ack, 101);

    a.on_segment(&acks[0].encode().unwrap(), now).unwrap();
    assert!(!a.sender().has_unacked());
    assert_eq!(a.sender().last_ack_received, 101);
}

/// A lost ACK causes one identical retransmission, which the receiver
/// re-acknowledges without delivering twice.
#[test]
fn lost_ack_leads_to_retransmission_and_reack() {
    let (mut a, mut b) = (conn(), conn());
    let t0 = Instant::now();

    let mut src = MemorySource::new();
    src.push(&[7u8; 100]);
    a.on_input(&mut src, t0).unwrap();
    let original = a.channel_mut().drain();
    assert_eq!(original.len(), 1);
    b.on_segment(&original[0], t0).unwrap();
    assert_eq!(b.sink().received().len(), 100);

    // The ACK is lost.
    b.channel_mut().drain();

    // Nothing is resent before the timeout.
    a.on_tick(t0 + a.config().retransmit_timeout).unwrap();
    assert_eq!(a.channel().pending(), 0);

    let t1 = t0 + just_past_rto(a.config());
    a.on_tick(t1).unwrap();
    let resent = a.channel_mut().drain();
    assert_eq!(resent, original);
    assert_eq!(a.sender().queue().front().unwrap().retransmit_count, 2);

    b.on_segment(&resent[0], t1).unwrap();
    assert_eq!(b.sink().received().len(), 100, "payload delivered once");
    assert_eq!(b.stats().out_of_window, 1);

    let reack = sent(&mut b);
    assert_eq!(reack.len(), 1);
    assert_eq!(reack[0].ack, 101);
    a.on_segment(&reack[0].encode().unwrap(), t1).unwrap();
    assert!(!a.sender().has_unacked());
}

/// End of input becomes a zero-length FIN at the next sequence number, and
/// the peer reports end-of-stream once even when the FIN is retransmitted.
#[test]
fn fin_delivered_exactly_once_despite_retransmission() {
    let (mut a, mut b) = (conn(), conn());
    let t0 = Instant::now();

    a.on_input(&mut MemorySource::closed_with(b"bye"), t0).unwrap();
    let segments = sent(&mut a);
    assert_eq!(segments.len(), 2);
    let fin = &segments[1];
    assert!(fin.is_fin());
    assert!(fin.data.is_empty());
    assert_eq!(fin.seq, 4);

    for s in &segments {
        b.on_segment(&s.encode().unwrap(), t0).unwrap();
    }
    assert_eq!(b.sink().received(), b"bye");
    assert_eq!(b.sink().eof_signals(), 1);
    assert!(b.receiver().fin_received);
    // Both ACKs are lost.
    b.channel_mut().drain();

    let t1 = t0 + just_past_rto(a.config());
    a.on_tick(t1).unwrap();
    // Only the oldest unacknowledged segment is resent.
    let resent = sent(&mut a);
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].data, b"bye");

    let t2 = t1 + just_past_rto(a.config());
    a.on_tick(t2).unwrap();
    assert_eq!(sent(&mut a)[0].data, b"bye");

    // Replay the FIN directly as well.
    b.on_segment(&fin.encode().unwrap(), t2).unwrap();
    assert_eq!(b.sink().eof_signals(), 1);
    assert_eq!(b.stats().duplicate, 1);

    let acks = sent(&mut b);
    assert!(!acks.is_empty());
    assert!(acks.iter().all(|s| s.ack == 5));
    a.on_segment(&acks[0].encode().unwrap(), t2).unwrap();
    assert!(!a.sender().has_unacked());
}

/// A datagram declaring 50 bytes but carrying only 30 is dropped silently.
#[test]
fn truncated_datagram_is_dropped_and_counted() {
    let mut b = conn();
    let seg = Segment::with_data(1, vec![0xAB; 50 - HEADER_LEN]);
    let raw = seg.encode().unwrap();
    assert_eq!(raw.len(), 50);

    b.on_segment(&raw[..30], Instant::now()).unwrap();
    assert_eq!(b.stats().truncated, 1);
    assert!(b.sink().received().is_empty());
    assert_eq!(b.channel().pending(), 0, "no ACK for a damaged segment");
    assert!(b.receiver().queue().is_empty());
}

#[test]
fn corrupted_datagram_is_dropped_and_counted() {
    let mut b = conn();
    let mut raw = Segment::with_data(1, b"payload".to_vec()).encode().unwrap();
    raw[HEADER_LEN + 2] ^= 0x10;

    b.on_segment(&raw, Instant::now()).unwrap();
    assert_eq!(b.stats().bad_checksum, 1);
    assert!(b.sink().received().is_empty());
    assert_eq!(b.channel().pending(), 0);
}

/// Duplicated and reordered datagrams never corrupt the delivered stream.
#[test]
fn duplicates_and_reordering_deliver_in_order() {
    let config = Config {
        send_window: 10_000,
        recv_window: 10_000,
        ..Config::default()
    };
    let (mut a, mut b) = (conn_with(config), conn_with(config));
    let now = Instant::now();
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

    let mut src = MemorySource::new();
    src.push(&payload);
    a.on_input(&mut src, now).unwrap();
    let mut raws = a.channel_mut().drain();
    assert_eq!(raws.len(), 4);

    raws.reverse();
    let replay = raws.clone();
    for raw in raws.iter().chain(replay.iter()) {
        b.on_segment(raw, now).unwrap();
    }

    assert_eq!(b.sink().received(), &payload[..]);
    assert!(b.receiver().queue().is_empty());
    settle(&mut a, &mut b, now);
    assert!(!a.sender().has_unacked());
}

/// With a window smaller than the data, segments go out one window at a
/// time and each advancing ACK releases the next.
#[test]
fn send_window_limits_data_in_flight() {
    let config = Config {
        send_window: 100,
        ..Config::default()
    };
    let (mut a, mut b) = (conn_with(config), conn());
    let now = Instant::now();
    let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

    let mut src = MemorySource::new();
    src.push(&payload);
    a.on_input(&mut src, now).unwrap();
    assert_eq!(a.sender().queue().len(), 10);

    let mut rounds = 0;
    loop {
        assert!(a.sender().bytes_in_flight() <= 100);
        let moved = pump(&mut a, &mut b, now);
        if moved == 0 {
            break;
        }
        assert_eq!(moved, 1, "one segment fits in the window");
        pump(&mut b, &mut a, now);
        rounds += 1;
    }

    assert_eq!(rounds, 10);
    assert_eq!(b.sink().received(), &payload[..]);
    assert!(!a.sender().has_unacked());
}

/// A receiver whose application stops reading holds data and resumes once
/// space frees up.
#[test]
fn full_sink_defers_delivery() {
    let mut a = conn();
    let mut b = Connection::new(MemoryChannel::new(), MemorySink::new(20), Config::default());
    let t0 = Instant::now();

    let mut src = MemorySource::new();
    src.push(b"0123456789abcdef");
    a.on_input(&mut src, t0).unwrap();
    settle(&mut a, &mut b, t0);
    assert_eq!(b.sink().received(), b"0123456789abcdef");

    // Four bytes of space left; eight are offered.
    src.push(b"ghijklmn");
    a.on_input(&mut src, t0).unwrap();
    pump(&mut a, &mut b, t0);
    assert_eq!(b.sink().received().len(), 16);
    assert_eq!(b.receiver().queue().len(), 1);
    assert_eq!(b.channel().pending(), 0, "nothing delivered, nothing acked");

    b.sink_mut().consume();
    b.on_tick(t0).unwrap();
    assert_eq!(b.sink().received(), b"0123456789abcdefghijklmn");
    settle(&mut a, &mut b, t0);
    assert!(!a.sender().has_unacked());
}

/// Both sides close, linger for two seconds, then leave the registry.
#[test]
fn graceful_close_lingers_then_destroys() {
    let reg: Registry<MemoryChannel, MemorySink> = Registry::new();
    let a = reg.insert(conn());
    let b = reg.insert(conn());
    let t0 = Instant::now();

    reg.on_input(a, &mut MemorySource::closed_with(b"ping"), t0).unwrap();
    reg.on_input(b, &mut MemorySource::closed_with(b"pong"), t0).unwrap();

    loop {
        let from_a = reg.with_connection(a, |c| c.channel_mut().drain()).unwrap();
        let from_b = reg.with_connection(b, |c| c.channel_mut().drain()).unwrap();
        if from_a.is_empty() && from_b.is_empty() {
            break;
        }
        for raw in &from_a {
            reg.on_segment(b, raw, t0).unwrap();
        }
        for raw in &from_b {
            reg.on_segment(a, raw, t0).unwrap();
        }
    }

    assert!(reg.tick(t0).is_empty());
    for (id, expected) in [(a, b"pong"), (b, b"ping")] {
        let (state, received, eofs) = reg
            .with_connection(id, |c| {
                (c.state(), c.sink().received().to_vec(), c.sink().eof_signals())
            })
            .unwrap();
        assert_eq!(state, ConnectionState::Lingering);
        assert_eq!(received, expected);
        assert_eq!(eofs, 1);
    }

    assert!(reg.tick(t0 + LINGER_PERIOD).is_empty());
    let closed = reg.tick(t0 + LINGER_PERIOD + Duration::from_millis(1));
    assert_eq!(closed, vec![(a, Teardown::Graceful), (b, Teardown::Graceful)]);
    assert!(reg.is_empty());
}

/// A peer that never answers is abandoned after six transmissions.
#[test]
fn silent_peer_is_abandoned() {
    let reg: Registry<MemoryChannel, MemorySink> = Registry::new();
    let id = reg.insert(conn());
    let config = Config::default();
    let mut now = Instant::now();

    reg.on_input(id, &mut MemorySource::closed_with(b"hello?"), now).unwrap();

    let mut transmissions = 0;
    let mut teardown = Vec::new();
    while teardown.is_empty() {
        if let Some(raws) = reg.with_connection(id, |c| c.channel_mut().drain()) {
            transmissions += raws
                .iter()
                .filter(|raw| Segment::decode(raw).unwrap().data == b"hello?")
                .count();
        }
        now += just_past_rto(&config);
        teardown = reg.tick(now);
    }

    assert_eq!(transmissions, 6);
    assert!(matches!(teardown[0].1, Teardown::Aborted(_)));
    assert!(!reg.contains(id));
}
