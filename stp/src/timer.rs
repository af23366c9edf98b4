//! Retransmission timer.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time. [`RetransmitTimer`] is the single
//! timer a connection owns:
//!
//! - [`arm`](RetransmitTimer::arm) schedules a tokio task that sleeps for the
//!   retransmission timeout (RTO) and then runs the expiry future. Arming
//!   always cancels the previous task first, so at most one timer is live.
//! - Every arm gets a fresh *generation*. The expiry future receives it and
//!   must [`claim`](RetransmitTimer::claim) it under the connection lock
//!   before acting. A task that lost a race with `cancel`/`arm` (it already
//!   woke up when it was aborted) finds its generation stale and does
//!   nothing.
//!
//! The RTO is fixed for the life of the connection; there is no RTT
//! estimation or back-off.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A scheduled expiry task.
#[derive(Debug)]
struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// The connection's single retransmission timer.
#[derive(Debug)]
pub struct RetransmitTimer {
    rto: Duration,
    generation: u64,
    armed: Option<Armed>,
}

impl RetransmitTimer {
    pub fn new(rto: Duration) -> Self {
        Self {
            rto,
            generation: 0,
            armed: None,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Generation of the live timer, if any.
    pub fn live_generation(&self) -> Option<u64> {
        self.armed.as_ref().map(|a| a.generation)
    }

    /// Cancel any live timer and schedule a new one.
    ///
    /// `on_expiry` is called immediately with the new generation; the future
    /// it returns runs after the RTO elapses. Must be called from within a
    /// tokio runtime.
    pub fn arm<F, Fut>(&mut self, on_expiry: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let rto = self.rto;
        let expiry = on_expiry(generation);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(rto).await;
            expiry.await;
        });
        self.armed = Some(Armed { generation, handle });
    }

    /// Cancel the live timer. Returns `true` if one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called by an expiring task (under the connection lock).
    ///
    /// Returns `true` and disarms the timer if `generation` is the live one.
    /// The task's own handle is detached rather than aborted, so the caller
    /// keeps running.
    pub fn claim(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
