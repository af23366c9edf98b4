//! Sender control block: the connection's state machine without I/O.
//!
//! [`ControlBlock`] holds everything the sender's actors share: FSM state,
//! send window, duplicate-ACK counter, sequence bookkeeping, the
//! retransmission timer and the loss models. It lives behind a single mutex
//! in [`crate::sender`]; every method here runs under that lock and returns
//! immediately.
//!
//! Methods never send. They return what should go on the wire
//! ([`Outgoing`], [`Inbound`], or the segment from
//! [`on_timeout`](ControlBlock::on_timeout)) and the caller transmits it after
//! releasing the lock. Cancelling the timer needs no runtime, so it happens
//! here; arming spawns a task and is left to the caller, signalled by the
//! `arm_timer` / `rearm` flags.

use crate::config::SenderConfig;
use crate::error::{Result, StpError};
use crate::segment::{Segment, SegmentType};
use crate::seq::advance;
use crate::simulator::{LossModel, RandomLoss};
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;
use crate::window::{AckMatch, SendWindow};

/// Duplicate ACKs that trigger a fast retransmission.
pub const DUP_ACK_THRESHOLD: u8 = 3;

/// A first transmission prepared under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub segment: Segment,
    /// Simulated forward loss: log `drp` and send nothing.
    pub dropped: bool,
    /// The caller must arm the retransmission timer before unlocking.
    pub arm_timer: bool,
}

/// What an inbound segment did to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Stale, unexpected or irrelevant in the current state.
    Ignored,
    /// SYN acknowledged; now Established.
    Connected,
    /// The handshake ACK was treated as lost by the reverse loss model.
    HandshakeAckDropped,
    /// `cleared` slots acknowledged. If `rearm`, restart the timer.
    Advanced { cleared: usize, rearm: bool },
    /// Duplicate of the ACK for the `send_base` segment.
    Duplicate {
        count: u8,
        fast_retransmit: Option<Segment>,
    },
    /// Every data byte acknowledged; now Closing.
    AllAcked,
    /// FIN acknowledged; now Finished.
    Finished,
}

pub struct ControlBlock {
    state: ConnectionState,
    window: SendWindow,
    dup_acks: u8,
    isn: u16,
    /// Sequence number for the next new segment.
    next_seq: u16,
    /// Cumulative end of the final DATA segment, once end-of-stream is seen.
    last_segment_seq: Option<u16>,
    fin_seq: Option<u16>,
    alive: bool,
    failure: Option<StpError>,
    timer: RetransmitTimer,
    forward_loss: Box<dyn LossModel>,
    reverse_loss: Box<dyn LossModel>,
}

impl ControlBlock {
    /// Build a control block with random loss models from `config`.
    pub fn new(config: &SenderConfig) -> Result<Self> {
        let forward = RandomLoss::new(config.forward_loss, config.seed);
        // Distinct stream for the reverse path so the two are independent.
        let reverse = RandomLoss::new(config.reverse_loss, config.seed.map(|s| s.wrapping_add(1)));
        Self::with_loss(config, Box::new(forward), Box::new(reverse))
    }

    /// Validates `config` first; a window smaller than one MSS is rejected.
    pub fn with_loss(
        config: &SenderConfig,
        forward_loss: Box<dyn LossModel>,
        reverse_loss: Box<dyn LossModel>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: ConnectionState::Closed,
            window: SendWindow::new(config.capacity()),
            dup_acks: 0,
            isn: config.isn,
            next_seq: config.isn,
            last_segment_seq: None,
            fin_seq: None,
            alive: true,
            failure: None,
            timer: RetransmitTimer::new(config.rto),
            forward_loss,
            reverse_loss,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn window(&self) -> &SendWindow {
        &self.window
    }

    pub fn duplicate_acks(&self) -> u8 {
        self.dup_acks
    }

    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    pub fn last_segment_seq(&self) -> Option<u16> {
        self.last_segment_seq
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn timer(&self) -> &RetransmitTimer {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut RetransmitTimer {
        &mut self.timer
    }

    // -----------------------------------------------------------------------
    // Driver-side transitions
    // -----------------------------------------------------------------------

    /// Closed → SynSent. Returns the SYN (seq = ISN, consumes one number).
    pub fn open(&mut self) -> Result<Outgoing> {
        self.expect(ConnectionState::Closed)?;
        let segment = Segment::syn(self.isn);
        self.next_seq = advance(self.isn, 1);
        self.state = ConnectionState::SynSent;
        log::info!("[stp:sender] CLOSED → SYN_SENT (isn={})", self.isn);
        Ok(self.first_transmission(segment, true))
    }

    /// `true` when the data pump may place another chunk.
    pub fn can_push(&self) -> bool {
        self.state == ConnectionState::Established && !self.window.is_full()
    }

    /// Put one chunk into the next free slot.
    ///
    /// `is_last` marks end-of-stream; its cumulative end becomes
    /// `last_segment_seq`.
    pub fn push_data(&mut self, payload: Vec<u8>, is_last: bool) -> Result<Outgoing> {
        if !self.can_push() {
            return Err(StpError::BadState(self.state));
        }
        let segment = Segment::data(self.next_seq, payload);
        self.next_seq = segment.end_seq();
        if is_last {
            self.last_segment_seq = Some(self.next_seq);
        }
        self.window.push(segment.clone());
        let arm = !self.timer.is_armed();
        Ok(self.first_transmission(segment, arm))
    }

    /// Established → Closing for an empty input stream.
    pub fn finish_empty(&mut self) -> Result<()> {
        self.expect(ConnectionState::Established)?;
        if !self.window.is_empty() || self.last_segment_seq.is_some() {
            return Err(StpError::BadState(self.state));
        }
        self.last_segment_seq = Some(self.next_seq);
        self.transition(ConnectionState::Closing);
        Ok(())
    }

    /// Closing → FinWait. The FIN carries `last_segment_seq`.
    pub fn begin_fin(&mut self) -> Result<Outgoing> {
        self.expect(ConnectionState::Closing)?;
        let fin_seq = self.last_segment_seq.unwrap_or(self.next_seq);
        self.fin_seq = Some(fin_seq);
        self.transition(ConnectionState::FinWait);
        Ok(self.first_transmission(Segment::fin(fin_seq), true))
    }

    // -----------------------------------------------------------------------
    // ACK processing
    // -----------------------------------------------------------------------

    /// Apply one inbound segment. Only ACKs have any effect.
    pub fn on_segment(&mut self, segment: &Segment) -> Inbound {
        if segment.kind != SegmentType::Ack || !self.alive {
            return Inbound::Ignored;
        }
        let ack = segment.seq;

        match self.state {
            ConnectionState::SynSent => self.on_handshake_ack(ack),
            ConnectionState::Established => self.on_data_ack(ack),
            ConnectionState::FinWait if Some(ack) == self.fin_seq.map(|f| advance(f, 1)) => {
                self.timer.cancel();
                self.alive = false;
                self.transition(ConnectionState::Finished);
                Inbound::Finished
            }
            _ => Inbound::Ignored,
        }
    }

    fn on_handshake_ack(&mut self, ack: u16) -> Inbound {
        if ack != advance(self.isn, 1) {
            return Inbound::Ignored;
        }
        if self.reverse_loss.should_drop() {
            return Inbound::HandshakeAckDropped;
        }
        self.timer.cancel();
        self.dup_acks = 0;
        self.transition(ConnectionState::Established);
        Inbound::Connected
    }

    fn on_data_ack(&mut self, ack: u16) -> Inbound {
        if self.last_segment_seq == Some(ack) {
            self.timer.cancel();
            self.window.clear();
            self.dup_acks = 0;
            self.transition(ConnectionState::Closing);
            return Inbound::AllAcked;
        }

        match self.window.on_ack(ack) {
            AckMatch::Advanced { cleared } => {
                self.dup_acks = 0;
                let rearm = !self.window.is_empty();
                if !rearm {
                    self.timer.cancel();
                }
                Inbound::Advanced { cleared, rearm }
            }
            AckMatch::Duplicate => {
                self.dup_acks += 1;
                let count = self.dup_acks;
                let fast_retransmit = if count == DUP_ACK_THRESHOLD {
                    self.dup_acks = 0;
                    self.window.base().cloned()
                } else {
                    None
                };
                Inbound::Duplicate {
                    count,
                    fast_retransmit,
                }
            }
            AckMatch::Unmatched => Inbound::Ignored,
        }
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Called by the expiry task holding `generation`.
    ///
    /// Returns the segment to retransmit unchanged, or `None` if the timer
    /// was stale or there is nothing outstanding.
    pub fn on_timeout(&mut self, generation: u64) -> Option<Segment> {
        if !self.timer.claim(generation) || !self.alive {
            return None;
        }
        match self.state {
            ConnectionState::SynSent => Some(Segment::syn(self.isn)),
            ConnectionState::FinWait => self.fin_seq.map(Segment::fin),
            ConnectionState::Established => self.window.base().cloned(),
            _ => None,
        }
    }

    /// Bookkeeping after a timeout retransmission went out. Returns `true`
    /// if the timer should be re-armed.
    pub fn after_retransmit(&mut self) -> bool {
        self.dup_acks = 0;
        self.alive && !self.state.is_terminal()
    }

    // -----------------------------------------------------------------------
    // Failure
    // -----------------------------------------------------------------------

    /// Stop the connection because of an unrecoverable error.
    pub fn abort(&mut self, error: StpError) {
        if !self.alive {
            return;
        }
        log::warn!("[stp:sender] aborting in {}: {error}", self.state);
        self.alive = false;
        self.timer.cancel();
        self.failure = Some(error);
    }

    /// Err if the connection died before finishing.
    pub fn check_alive(&mut self) -> Result<()> {
        if self.alive || self.state.is_terminal() {
            return Ok(());
        }
        Err(self
            .failure
            .take()
            .unwrap_or(StpError::BadState(self.state)))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn expect(&self, state: ConnectionState) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(StpError::BadState(self.state))
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        log::info!("[stp:sender] {} → {to}", self.state);
        self.state = to;
    }

    fn first_transmission(&mut self, segment: Segment, arm_timer: bool) -> Outgoing {
        let dropped = self.forward_loss.should_drop();
        Outgoing {
            segment,
            dropped,
            arm_timer,
        }
    }
}

impl std::fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBlock")
            .field("state", &self.state)
            .field("window", &self.window)
            .field("dup_acks", &self.dup_acks)
            .field("next_seq", &self.next_seq)
            .field("last_segment_seq", &self.last_segment_seq)
            .field("fin_seq", &self.fin_seq)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}
