//! Wire format for protocol segments.
//!
//! Every datagram exchanged between peers carries exactly one [`Segment`].
//! This module is responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], rejecting
//!   truncated, malformed or corrupted input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Length             |     Flags     |    Window     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    (cont.)    |           Checksum            |  Data ...     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 15 bytes.
//! seq(4) + ack(4) + length(2) + flags(1) + window(2) + checksum(2)
//!
//! `Length` counts header **and** payload.  Bytes trailing the declared
//! length in a datagram are ignored.

use thiserror::Error;

use crate::checksum::compute_checksum;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0001;
    /// Reserved; never set by this implementation.
    pub const SYN: u8 = 0b0000_0010;
    /// Sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 15;

/// Largest payload carried by one segment.
pub const MAX_SEGMENT_DATA: usize = 1440;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_LEN: usize = 8;
const OFF_FLAGS: usize = 10;
const OFF_WINDOW: usize = 11;
const OFF_CHECKSUM: usize = 13;

/// One framed protocol message.
///
/// `length` and `checksum` are not stored: [`Segment::encode`] derives both
/// from the payload, and [`Segment::decode`] verifies them before a value of
/// this type is ever produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Stream position of the first payload byte (or of the FIN).
    pub seq: u32,
    /// Cumulative acknowledgement: next sequence number expected from the peer.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Receiver's advertised buffer capacity in bytes.
    pub window: u16,
    /// Payload bytes; empty for pure control segments.
    pub data: Vec<u8>,
}

impl Segment {
    /// A data segment starting at `seq`.  Ack fields are stamped at send time.
    pub fn with_data(seq: u32, data: Vec<u8>) -> Self {
        Self {
            seq,
            ack: 0,
            flags: 0,
            window: 0,
            data,
        }
    }

    /// A zero-length end-of-stream marker occupying sequence number `seq`.
    pub fn fin(seq: u32) -> Self {
        Self {
            seq,
            ack: 0,
            flags: flags::FIN,
            window: 0,
            data: Vec::new(),
        }
    }

    /// A pure acknowledgement.  Its sequence number carries no meaning.
    pub fn ack_only(ack: u32, window: u16) -> Self {
        Self {
            seq: 0,
            ack,
            flags: flags::ACK,
            window,
            data: Vec::new(),
        }
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    /// Number of payload bytes.
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }

    /// Header plus payload, i.e. the value of the `length` field.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Sequence number of the last byte this segment occupies.
    ///
    /// A zero-length segment (the FIN) occupies its own sequence number.
    pub fn last_byte_seq(&self) -> u32 {
        match self.data.len() as u32 {
            0 => self.seq,
            n => self.seq.wrapping_add(n - 1),
        }
    }

    /// Sequence space consumed by this segment: its payload, or one slot for
    /// a FIN.  Pure acknowledgements consume nothing.
    pub fn seq_space(&self) -> u32 {
        if self.data.is_empty() {
            u32::from(self.is_fin())
        } else {
            self.data.len() as u32
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The length field and checksum are computed from the actual payload.
    pub fn encode(&self) -> Result<Vec<u8>, SegmentError> {
        let total = self.wire_len();
        let length = u16::try_from(total).map_err(|_| SegmentError::PayloadTooLarge(total))?;

        let mut buf = vec![0u8; total];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_LEN..OFF_LEN + 2].copy_from_slice(&length.to_be_bytes());
        buf[OFF_FLAGS] = self.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.window.to_be_bytes());
        // Checksum field stays zero while the checksum is computed.
        buf[HEADER_LEN..].copy_from_slice(&self.data);

        let csum = compute_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than the header or than the declared length,
    /// - the declared length is smaller than the header itself, or
    /// - the checksum over the declared length does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::Truncated {
                declared: None,
                available: buf.len(),
            });
        }

        let declared = usize::from(read_u16(buf, OFF_LEN));
        if buf.len() < declared {
            return Err(SegmentError::Truncated {
                declared: Some(declared),
                available: buf.len(),
            });
        }
        if declared < HEADER_LEN {
            return Err(SegmentError::BadLength(declared));
        }

        // Verify over exactly the declared bytes, with the stored field zeroed.
        let stored = read_u16(buf, OFF_CHECKSUM);
        let mut scratch = buf[..declared].to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        let computed = compute_checksum(&scratch);
        if computed != stored {
            return Err(SegmentError::ChecksumFailed { stored, computed });
        }

        Ok(Segment {
            seq: read_u32(buf, OFF_SEQ),
            ack: read_u32(buf, OFF_ACK),
            flags: buf[OFF_FLAGS],
            window: read_u16(buf, OFF_WINDOW),
            data: buf[HEADER_LEN..declared].to_vec(),
        })
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seq={} ack={} len={} flags=",
            self.seq,
            self.ack,
            self.wire_len()
        )?;
        if self.flags & flags::SYN != 0 {
            f.write_str("S")?;
        }
        if self.is_ack() {
            f.write_str("A")?;
        }
        if self.is_fin() {
            f.write_str("F")?;
        }
        write!(f, " win={}", self.window)
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Errors that can arise when framing or parsing a segment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// Fewer bytes arrived than the header or the declared length requires.
    #[error("truncated segment: declared {declared:?} bytes, {available} available")]
    Truncated {
        declared: Option<usize>,
        available: usize,
    },
    /// The length field is smaller than the fixed header.
    #[error("length field {0} is smaller than the header")]
    BadLength(usize),
    /// Checksum did not match the recomputed value.
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumFailed { stored: u16, computed: u16 },
    /// Payload does not fit in the 16-bit length field.
    #[error("segment of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
}
