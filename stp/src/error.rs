//! Library-wide error type.

use std::io;

use thiserror::Error;

use crate::segment::SegmentError;
use crate::state::ConnectionState;

/// Errors surfaced by the sender and receiver.
///
/// Loss and reordering are not errors; they are recovered by retransmission
/// and only show up in the segment event log.
#[derive(Debug, Error)]
pub enum StpError {
    /// The peer refused the datagram (ICMP port unreachable or similar).
    /// Not recoverable: the connection is aborted without retry.
    #[error("peer unreachable: connection refused")]
    PeerUnreachable,

    /// Any other channel or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A datagram could not be decoded as a segment.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// Rejected configuration (window, MSS, loss probabilities, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation invoked while the connection is in the wrong state.
    #[error("operation not valid in state {0}")]
    BadState(ConnectionState),
}

impl StpError {
    /// Map a channel error, turning a refusal into [`StpError::PeerUnreachable`].
    pub fn from_channel(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::ConnectionRefused {
            StpError::PeerUnreachable
        } else {
            StpError::Io(e)
        }
    }
}

pub type Result<T, E = StpError> = std::result::Result<T, E>;
