//! `stp`, the Simple Transport Protocol: a reliable byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────────┐      DATA / SYN / FIN     ┌──────────────┐
//!  │            Sender            │──────────────────────────▶│   Receiver   │
//!  │  driver · ACK task · timer   │◀──────────────────────────│ ReorderBuffer│
//!  └──────────────┬───────────────┘      cumulative ACKs      └──────┬───────┘
//!                 │ Mutex                                            │
//!  ┌──────────────▼───────────────┐                                  │
//!  │         ControlBlock         │  state · SendWindow · timer      │
//!  │   (sans-I/O state machine)   │  dup-ACK count · loss models     │
//!  └──────────────┬───────────────┘                                  │
//!                 │ encoded segments                                 │
//!  ┌──────────────▼──────────────────────────────────────────────────▼───────┐
//!  │   Channel: Socket (tokio UdpSocket) · MemoryChannel · Lossy<C>          │
//!  └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]  : wire format (serialise / deserialise)
//! - [`seq`]      : 16-bit wrap-around sequence arithmetic
//! - [`state`]    : sender FSM states
//! - [`window`]   : circular send window with cumulative-ACK matching
//! - [`timer`]    : the single cancellable retransmission timer
//! - [`control`]  : sender state machine, no I/O
//! - [`sender`]   : tokio actors driving the control block
//! - [`receiver`] : reordering buffer and receive loop
//! - [`socket`]   : channel trait and async UDP socket
//! - [`simulator`]: loss models and in-memory links for testing
//! - [`event_log`]: per-segment log file and transfer summary
//! - [`config`]   : connection parameters and validation
//! - [`error`]    : library error type

pub mod config;
pub mod control;
pub mod error;
pub mod event_log;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod window;

pub use config::{ReceiverConfig, SenderConfig, DEFAULT_ISN, MSS};
pub use error::{Result, StpError};
pub use receiver::Receiver;
pub use sender::Sender;
pub use socket::{Channel, Socket};
