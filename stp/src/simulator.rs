//! Loss simulation and in-memory links.
//!
//! Real networks drop and reorder packets. To exercise the recovery paths
//! without depending on actual network conditions this module provides:
//!
//! | Item             | Used by                                              |
//! |------------------|------------------------------------------------------|
//! | [`LossModel`]    | The sender, to decide whether a first transmission   |
//! |                  | (forward path) or a handshake ACK (reverse path) is  |
//! |                  | treated as lost.                                     |
//! | [`RandomLoss`]   | Bernoulli drops with a configurable probability,     |
//! |                  | optionally seeded for reproducible runs.             |
//! | [`ScriptedLoss`] | Deterministic drop pattern for tests.                |
//! | [`memory_pair`]  | Two connected in-process [`Channel`]s.               |
//! | [`Lossy`]        | A [`Channel`] wrapper that drops outbound datagrams  |
//! |                  | matching a predicate and records what went through.  |

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::Channel;

// ---------------------------------------------------------------------------
// Loss models
// ---------------------------------------------------------------------------

/// Decides, one transmission at a time, whether a datagram is "lost".
pub trait LossModel: Send + 'static {
    fn should_drop(&mut self) -> bool;
}

/// Drops each datagram independently with probability `probability`.
#[derive(Debug)]
pub struct RandomLoss {
    probability: f64,
    rng: StdRng,
}

impl RandomLoss {
    /// `seed = None` draws a seed from the thread-local RNG.
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self { probability, rng }
    }
}

impl LossModel for RandomLoss {
    fn should_drop(&mut self) -> bool {
        if self.probability <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < self.probability
    }
}

/// Follows a fixed pattern of decisions, then never drops again.
#[derive(Debug, Default)]
pub struct ScriptedLoss {
    pattern: VecDeque<bool>,
}

impl ScriptedLoss {
    pub fn new(pattern: impl IntoIterator<Item = bool>) -> Self {
        Self {
            pattern: pattern.into_iter().collect(),
        }
    }

    /// Drop exactly the `n`-th decision (0-based).
    pub fn drop_nth(n: usize) -> Self {
        Self::new((0..=n).map(|i| i == n))
    }
}

impl LossModel for ScriptedLoss {
    fn should_drop(&mut self) -> bool {
        self.pattern.pop_front().unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// In-memory link
// ---------------------------------------------------------------------------

/// One end of an in-process datagram link created by [`memory_pair`].
///
/// Delivery is reliable and ordered. Once the other end is dropped, both
/// `send` and `recv` fail with `ConnectionRefused`, the same way a connected
/// UDP socket reports an unreachable peer.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Create two connected [`MemoryChannel`]s.
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryChannel {
            tx: a_tx,
            rx: tokio::sync::Mutex::new(a_rx),
        },
        MemoryChannel {
            tx: b_tx,
            rx: tokio::sync::Mutex::new(b_rx),
        },
    )
}

fn refused() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionRefused, "peer end of link closed")
}

impl Channel for MemoryChannel {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.tx.send(buf.to_vec()).map_err(|_| refused())?;
        Ok(buf.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().await;
        let datagram = rx.recv().await.ok_or_else(refused)?;
        // Truncate like a UDP read into a short buffer.
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Fault-injecting wrapper
// ---------------------------------------------------------------------------

type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Wraps a [`Channel`], silently discarding outbound datagrams for which the
/// filter returns `true`. Every datagram handed to `send` is recorded, with
/// its fate, for later inspection.
pub struct Lossy<C> {
    inner: C,
    filter: Mutex<DropFilter>,
    history: Mutex<Vec<(Vec<u8>, bool)>>,
}

impl<C: Channel> Lossy<C> {
    pub fn new(inner: C, filter: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        Self {
            inner,
            filter: Mutex::new(Box::new(filter)),
            history: Mutex::new(Vec::new()),
        }
    }

    /// A wrapper that never drops; useful to record traffic only.
    pub fn passthrough(inner: C) -> Self {
        Self::new(inner, |_| false)
    }

    /// Every datagram given to `send` so far, paired with `true` if dropped.
    pub fn history(&self) -> Vec<(Vec<u8>, bool)> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Datagrams that actually went through.
    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.history()
            .into_iter()
            .filter_map(|(d, dropped)| (!dropped).then_some(d))
            .collect()
    }
}

impl<C: Channel> Channel for Lossy<C> {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let dropped = {
            let mut filter = self.filter.lock().unwrap_or_else(PoisonError::into_inner);
            (*filter)(buf)
        };
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((buf.to_vec(), dropped));
        if dropped {
            return Ok(buf.len());
        }
        self.inner.send(buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }
}
