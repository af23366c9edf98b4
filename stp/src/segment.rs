//! Wire-format definitions for STP segments.
//!
//! Every datagram exchanged between sender and receiver is a [`Segment`].
//! This module is responsible for:
//! - Defining the on-wire binary layout (type tag, sequence number, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning
//!   [`SegmentError`] for truncated input or an unknown type tag.
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
//! |             Type              |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 4 bytes.

use std::fmt;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 4;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 2;

/// Segment type tag carried in the high 16 bits of the header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentType {
    /// Carries file bytes.
    Data = 0,
    /// Cumulative acknowledgement; `seq` holds the acknowledged number.
    Ack = 1,
    /// Connection request; consumes one sequence number.
    Syn = 2,
    /// End of stream; consumes one sequence number.
    Fin = 3,
}

impl SegmentType {
    /// Numeric tag written on the wire.
    pub fn tag(self) -> u16 {
        self as u16
    }

    /// `true` for types whose payload is always empty on decode.
    pub fn is_control(self) -> bool {
        matches!(self, SegmentType::Syn | SegmentType::Fin)
    }
}

impl TryFrom<u16> for SegmentType {
    type Error = SegmentError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(SegmentType::Data),
            1 => Ok(SegmentType::Ack),
            2 => Ok(SegmentType::Syn),
            3 => Ok(SegmentType::Fin),
            other => Err(SegmentError::UnknownType(other)),
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentType::Data => "DATA",
            SegmentType::Ack => "ACK",
            SegmentType::Syn => "SYN",
            SegmentType::Fin => "FIN",
        };
        // `pad` so width specifiers in log lines line up.
        f.pad(name)
    }
}

/// A complete STP datagram: header fields + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentType,
    /// Sequence number of the first payload byte (DATA/SYN/FIN) or the
    /// acknowledged sequence number (ACK), modulo 2^16.
    pub seq: u16,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(kind: SegmentType, seq: u16, payload: Vec<u8>) -> Self {
        Self { kind, seq, payload }
    }

    pub fn data(seq: u16, payload: Vec<u8>) -> Self {
        Self::new(SegmentType::Data, seq, payload)
    }

    pub fn ack(ack: u16) -> Self {
        Self::new(SegmentType::Ack, ack, Vec::new())
    }

    pub fn syn(seq: u16) -> Self {
        Self::new(SegmentType::Syn, seq, Vec::new())
    }

    pub fn fin(seq: u16) -> Self {
        Self::new(SegmentType::Fin, seq, Vec::new())
    }

    /// Number of payload bytes carried.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Sequence number immediately following this segment's payload.
    ///
    /// A cumulative ACK equal to this value acknowledges the whole segment.
    pub fn end_seq(&self) -> u16 {
        crate::seq::advance(self.seq, self.payload.len())
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// SYN and FIN are always written without payload.
    pub fn encode(&self) -> Vec<u8> {
        let payload: &[u8] = if self.kind.is_control() {
            &[]
        } else {
            &self.payload
        };
        let mut buf = vec![0u8; HEADER_LEN + payload.len()];

        buf[OFF_TYPE..OFF_TYPE + 2].copy_from_slice(&self.kind.tag().to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.seq.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(payload);

        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`], or
    /// - the type tag is not one of the four known values.
    ///
    /// Trailing bytes after a SYN or FIN header are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::Truncated(buf.len()));
        }

        let tag = u16::from_be_bytes([buf[OFF_TYPE], buf[OFF_TYPE + 1]]);
        let seq = u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]);
        let kind = SegmentType::try_from(tag)?;

        let payload = if kind.is_control() {
            Vec::new()
        } else {
            buf[HEADER_LEN..].to_vec()
        };

        Ok(Segment { kind, seq, payload })
    }
}

/// Errors that can arise when parsing a raw datagram (a malformed segment).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// Buffer shorter than the fixed header size.
    #[error("malformed segment: {0} byte(s) is shorter than the 4-byte header")]
    Truncated(usize),
    /// Type tag outside the known range.
    #[error("malformed segment: unknown type tag {0}")]
    UnknownType(u16),
}
