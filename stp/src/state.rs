//! Sender finite-state machine (FSM) types.
//!
//! This module defines every state the sender's control block can occupy.
//! Transitions are not implemented here; they live in [`crate::control`].
//! Keeping the state type on its own makes it cheap to share with the event
//! log, errors and tests.

/// All possible states of the sender FSM.
///
/// ```text
///  CLOSED ──SYN sent──▶ SYN_SENT ──ACK(isn+1)──▶ ESTABLISHED
///                          ▲  │                        │
///                          └──┘ timeout: resend SYN    │ ACK == last_segment_sequence
///                                                      ▼
///  FINISHED ◀──ACK(fin+1)── FIN_WAIT ◀──FIN sent── CLOSING
///                           ▲   │
///                           └───┘ timeout: resend FIN
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for its ACK.
    SynSent,
    /// Handshake complete; the data pump is filling the window.
    Established,
    /// Every data byte is acknowledged; FIN not yet sent.
    Closing,
    /// FIN sent (or simulated lost); waiting for its ACK.
    FinWait,
    /// FIN acknowledged; all actors stop.
    Finished,
}

impl ConnectionState {
    /// `true` once the connection can no longer make progress.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Finished
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::Established => "EST",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::FinWait => "FIN_WAIT",
            ConnectionState::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}
