//! Sequence-number arithmetic in the 16-bit wrap-around space.
//!
//! Every STP sequence number lives in Z/65536Z. The sender only ever compares
//! sequence numbers for **exact** equality (an ACK matches a buffered segment
//! when it equals that segment's cumulative end), so ordering helpers are only
//! needed by the receiver to recognise stale retransmissions.
//!
//! Ordering uses the usual half-space convention: `a` precedes `b` when the
//! forward distance from `a` to `b` is non-zero and less than 2^15. This holds
//! as long as the window is far smaller than 32 KiB, which configuration
//! validation guarantees.

/// Size of the sequence space.
pub const SEQ_SPACE: u32 = 1 << 16;

/// `(seq + n) mod 2^16`.
#[inline]
pub fn advance(seq: u16, n: usize) -> u16 {
    // Only the low 16 bits of `n` matter modulo 2^16.
    seq.wrapping_add(n as u16)
}

/// Forward distance from `from` to `to`, in `0..2^16`.
#[inline]
pub fn distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

/// Returns `true` when `a` strictly precedes `b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u16, b: u16) -> bool {
    let d = distance(a, b);
    d != 0 && d < 0x8000
}
