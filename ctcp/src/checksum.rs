//! Ones'-complement checksum used to protect every segment.
//!
//! The algorithm is the classic Internet checksum (RFC 1071) with one twist:
//! a computed value of `0x0000` is reported as `0xFFFF`, because a zero
//! checksum field on the wire means "no checksum present".  Both values are
//! equivalent in ones'-complement arithmetic, so verification is unaffected.

/// Compute the checksum over `data`.
///
/// Sums consecutive 16-bit big-endian words, folds the carries back into the
/// low 16 bits and returns the ones'-complement.  The caller must zero any
/// checksum field inside `data` before calling this function.
pub fn compute_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        // Fold early so very long buffers can never overflow the accumulator.
        if sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    match !(sum as u16) {
        0 => 0xffff,
        csum => csum,
    }
}

/// Returns `true` when `stored` matches the checksum of `data`.
///
/// `data` must already have its checksum field zeroed.
pub fn verify_checksum(data: &[u8], stored: u16) -> bool {
    compute_checksum(data) == stored
}
