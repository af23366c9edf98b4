//! Sender: tokio actors around the [`ControlBlock`].
//!
//! # Actors
//!
//! ```text
//!   driver (caller's task)         ACK task (spawned)          timer task (spawned per arm)
//!   connect / send_stream / close  recv → decode → on_segment  sleep(rto) → on_timeout
//!            │                              │                             │
//!            └──────────── lock ────────────┴──────────── lock ───────────┘
//!                              Mutex<ControlBlock>
//! ```
//!
//! - The lock is never held across an `.await` and no datagram is sent while
//!   it is held. Each actor decides under the lock, releases it, then sends.
//! - Every state or window change wakes the driver through the `changed`
//!   [`Notify`]. The driver registers interest before checking the condition
//!   so it can never miss a wake-up.
//! - Any channel error aborts the connection: the timer is cancelled, the
//!   driver is woken and returns the error, and the ACK task exits.

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::SenderConfig;
use crate::control::{ControlBlock, Inbound, Outgoing};
use crate::error::{Result, StpError};
use crate::event_log::{Action, EventLog};
use crate::segment::Segment;
use crate::socket::{Channel, MAX_DATAGRAM};
use crate::state::ConnectionState;

/// State shared by the driver, the ACK task and timer tasks.
struct Shared<C> {
    control: Mutex<ControlBlock>,
    /// Signalled after every state or window change.
    changed: Notify,
    /// Tells the ACK task to stop.
    shutdown: Notify,
    channel: C,
    log: EventLog,
}

impl<C: Channel> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, ControlBlock> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send an encoded segment, aborting the connection on failure.
    async fn transmit(&self, segment: &Segment) -> bool {
        match self.channel.send(&segment.encode()).await {
            Ok(_) => true,
            Err(e) => {
                self.abort(StpError::from_channel(e));
                false
            }
        }
    }

    fn abort(&self, error: StpError) {
        self.lock().abort(error);
        self.changed.notify_waiters();
        self.shutdown.notify_one();
    }
}

/// Log and (unless simulated lost) send a first transmission.
async fn send_first<C: Channel>(shared: &Shared<C>, out: Outgoing) {
    if out.dropped {
        log::debug!("[stp:sender] ✗ {} seq={} (simulated loss)", out.segment.kind, out.segment.seq);
        shared.log.record(Action::Drp, &out.segment);
        return;
    }
    log::debug!(
        "[stp:sender] → {} seq={} len={}",
        out.segment.kind,
        out.segment.seq,
        out.segment.len()
    );
    shared.log.record(Action::Snd, &out.segment);
    shared.transmit(&out.segment).await;
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// (Re)arm the retransmission timer. Call with the control lock held.
fn arm_timer<C: Channel>(shared: &Arc<Shared<C>>, control: &mut ControlBlock) {
    let shared = Arc::downgrade(shared);
    control
        .timer_mut()
        .arm(move |generation| on_expiry(shared, generation));
}

async fn on_expiry<C: Channel>(shared: Weak<Shared<C>>, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let segment = {
        let mut control = shared.lock();
        match control.on_timeout(generation) {
            Some(segment) => segment,
            None => return,
        }
    };

    log::debug!("[stp:sender] ⟳ timeout: {} seq={}", segment.kind, segment.seq);
    shared.log.record_retransmit(&segment);
    if !shared.transmit(&segment).await {
        return;
    }

    let mut control = shared.lock();
    if control.after_retransmit() {
        arm_timer(&shared, &mut control);
    }
}

// ---------------------------------------------------------------------------
// ACK task
// ---------------------------------------------------------------------------

async fn ack_loop<C: Channel>(shared: Arc<Shared<C>>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            r = shared.channel.recv(&mut buf) => r,
            _ = shared.shutdown.notified() => break,
        };
        let n = match received {
            Ok(n) => n,
            Err(e) => {
                shared.abort(StpError::from_channel(e));
                break;
            }
        };
        let segment = match Segment::decode(&buf[..n]) {
            Ok(segment) => segment,
            Err(e) => {
                log::warn!("[stp:sender] discarding datagram: {e}");
                continue;
            }
        };
        log::debug!("[stp:sender] ← {} seq={}", segment.kind, segment.seq);
        shared.log.record(Action::Rcv, &segment);

        let inbound = {
            let mut control = shared.lock();
            let inbound = control.on_segment(&segment);
            if let Inbound::Advanced { rearm: true, .. } = inbound {
                arm_timer(&shared, &mut control);
            }
            inbound
        };

        match &inbound {
            Inbound::HandshakeAckDropped => {
                log::debug!("[stp:sender] ✗ handshake ACK seq={} (simulated loss)", segment.seq);
                shared.log.record(Action::Drp, &segment);
            }
            Inbound::Duplicate {
                count,
                fast_retransmit,
            } => {
                log::debug!("[stp:sender] duplicate ACK {} ×{count}", segment.seq);
                shared.log.note_duplicate_ack();
                if let Some(segment) = fast_retransmit {
                    log::debug!("[stp:sender] ⇒ fast retransmit seq={}", segment.seq);
                    shared.log.record(Action::Fst, segment);
                    if !shared.transmit(segment).await {
                        break;
                    }
                }
            }
            Inbound::Ignored => continue,
            _ => {}
        }

        shared.changed.notify_waiters();
        if inbound == Inbound::Finished {
            break;
        }
    }
    log::debug!("[stp:sender] ACK task exiting");
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// One STP sender connection over a [`Channel`].
///
/// ```ignore
/// let socket = Socket::open(local, peer).await?;
/// let mut sender = Sender::new(socket, SenderConfig::default(), EventLog::new("sender"))?;
/// sender.run(tokio::fs::File::open("input.txt").await?).await?;
/// ```
pub struct Sender<C: Channel> {
    shared: Arc<Shared<C>>,
    ack_task: Option<JoinHandle<()>>,
    mss: usize,
}

impl<C: Channel> Sender<C> {
    /// Validate `config` and build a sender using random loss models.
    pub fn new(channel: C, config: SenderConfig, log: EventLog) -> Result<Self> {
        let control = ControlBlock::new(&config)?;
        Ok(Self::with_control(channel, control, config.mss, log))
    }

    /// Build a sender around a prepared (already validated) control block.
    pub fn with_control(channel: C, control: ControlBlock, mss: usize, log: EventLog) -> Self {
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(control),
                changed: Notify::new(),
                shutdown: Notify::new(),
                channel,
                log,
            }),
            ack_task: None,
            mss,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.shared.log
    }

    pub fn channel(&self) -> &C {
        &self.shared.channel
    }

    /// Run `step` under the lock until it yields a value, sleeping on the
    /// `changed` notification in between.
    async fn wait_for<T>(
        &self,
        mut step: impl FnMut(&Arc<Shared<C>>, &mut ControlBlock) -> Result<Option<T>>,
    ) -> Result<T> {
        loop {
            let mut notified = pin!(self.shared.changed.notified());
            notified.as_mut().enable();
            {
                let mut control = self.shared.lock();
                control.check_alive()?;
                if let Some(value) = step(&self.shared, &mut control)? {
                    return Ok(value);
                }
            }
            notified.await;
        }
    }

    /// Perform the SYN/ACK handshake.
    pub async fn connect(&mut self) -> Result<()> {
        let syn = {
            let mut control = self.shared.lock();
            let out = control.open()?;
            arm_timer(&self.shared, &mut control);
            out
        };
        self.ack_task = Some(tokio::spawn(ack_loop(Arc::clone(&self.shared))));
        send_first(&self.shared, syn).await;

        self.wait_for(|_, control| {
            Ok(match control.state() {
                ConnectionState::SynSent => None,
                ConnectionState::Established => Some(()),
                other => return Err(StpError::BadState(other)),
            })
        })
        .await
    }

    /// Transmit everything `reader` yields, then wait until it is all
    /// acknowledged. Leaves the connection in Closing.
    pub async fn send_stream<R>(&mut self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut current = read_chunk(&mut reader, self.mss).await?;
        if current.is_empty() {
            log::info!("[stp:sender] empty input, closing without data");
            self.wait_for(|_, control| control.finish_empty().map(Some))
                .await?;
        } else {
            // One chunk of lookahead tells us which chunk is the last.
            loop {
                let next = read_chunk(&mut reader, self.mss).await?;
                let is_last = next.is_empty();
                self.push(current, is_last).await?;
                if is_last {
                    break;
                }
                current = next;
            }
        }

        self.wait_for(|_, control| {
            Ok(match control.state() {
                ConnectionState::Established => None,
                ConnectionState::Closing => Some(()),
                other => return Err(StpError::BadState(other)),
            })
        })
        .await
    }

    /// Place one chunk in the window, waiting for a free slot.
    async fn push(&self, chunk: Vec<u8>, is_last: bool) -> Result<()> {
        let mut chunk = Some(chunk);
        let out = self
            .wait_for(|shared, control| {
                if !control.can_push() {
                    return Ok(None);
                }
                let Some(payload) = chunk.take() else {
                    return Ok(None);
                };
                let out = control.push_data(payload, is_last)?;
                if out.arm_timer {
                    arm_timer(shared, control);
                }
                Ok(Some(out))
            })
            .await?;
        send_first(&self.shared, out).await;
        Ok(())
    }

    /// Send FIN and wait for its acknowledgement.
    pub async fn close(&mut self) -> Result<()> {
        let fin = {
            let mut control = self.shared.lock();
            control.check_alive()?;
            let out = control.begin_fin()?;
            arm_timer(&self.shared, &mut control);
            out
        };
        send_first(&self.shared, fin).await;

        self.wait_for(|_, control| Ok(control.state().is_terminal().then_some(())))
            .await?;
        self.shutdown().await;
        Ok(())
    }

    /// Handshake, transfer, teardown. Stops every task on error.
    pub async fn run<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let result = async {
            self.connect().await?;
            self.send_stream(reader).await?;
            self.close().await
        }
        .await;
        if result.is_err() {
            self.shutdown().await;
        }
        result
    }

    /// Cancel the timer, stop the ACK task and wait for it to exit.
    pub async fn shutdown(&mut self) {
        self.shared.lock().timer_mut().cancel();
        self.shared.shutdown.notify_one();
        if let Some(task) = self.ack_task.take() {
            if let Err(e) = task.await {
                log::warn!("[stp:sender] ACK task failed: {e}");
            }
        }
    }
}

impl<C: Channel> Drop for Sender<C> {
    fn drop(&mut self) {
        if let Some(task) = self.ack_task.take() {
            task.abort();
        }
        self.shared.lock().timer_mut().cancel();
    }
}

/// Read up to `mss` bytes; a short chunk only at end of stream.
async fn read_chunk<R>(reader: &mut R, mss: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = Vec::with_capacity(mss);
    (&mut *reader).take(mss as u64).read_to_end(&mut chunk).await?;
    Ok(chunk)
}
