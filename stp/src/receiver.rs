//! Receiving end: in-order reassembly and the serve loop.
//!
//! [`ReorderBuffer`] is the pure part. It holds out-of-order DATA payloads
//! keyed by sequence number and an `expected` cursor; every DATA segment
//! yields the cumulative ACK to send back plus whatever became contiguous.
//!
//! [`Receiver`] drives it over a [`Channel`]: answers SYN with `seq + 1`,
//! writes delivered bytes to an `AsyncWrite` sink, and on FIN replies
//! `seq + 1`, then lingers re-acknowledging retransmitted FINs in case the
//! first FIN-ACK was lost.

use std::collections::HashMap;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::config::ReceiverConfig;
use crate::error::{Result, StpError};
use crate::event_log::{Action, EventLog};
use crate::segment::{Segment, SegmentType};
use crate::seq::{advance, distance, seq_lt};
use crate::socket::{Channel, MAX_DATAGRAM};

// ---------------------------------------------------------------------------
// ReorderBuffer
// ---------------------------------------------------------------------------

/// Result of accepting one DATA segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Cumulative ACK to send: the new `expected`.
    pub ack: u16,
    /// Payloads that became contiguous, in stream order.
    pub flushed: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct ReorderBuffer {
    pending: HashMap<u16, Vec<u8>>,
    /// Next in-order sequence number; `None` until the SYN arrives.
    expected: Option<u16>,
    peer_isn: Option<u16>,
    max_window: usize,
}

impl ReorderBuffer {
    /// `max_window` bounds how far past `expected` a segment may start.
    pub fn new(max_window: usize) -> Self {
        Self {
            pending: HashMap::new(),
            expected: None,
            peer_isn: None,
            max_window,
        }
    }

    pub fn expected(&self) -> Option<u16> {
        self.expected
    }

    /// Bytes held out of order.
    pub fn buffered(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Handle a SYN; returns the ACK (`seq + 1`).
    ///
    /// A retransmitted SYN with the same ISN leaves the stream untouched.
    pub fn on_syn(&mut self, seq: u16) -> u16 {
        let ack = advance(seq, 1);
        if self.peer_isn != Some(seq) {
            self.peer_isn = Some(seq);
            self.expected = Some(ack);
            self.pending.clear();
        }
        ack
    }

    /// Handle a DATA segment. `None` if no SYN has been seen yet.
    pub fn on_data(&mut self, seq: u16, payload: Vec<u8>) -> Option<Delivery> {
        let expected = self.expected?;
        let duplicate = self.pending.contains_key(&seq) || seq_lt(seq, expected);
        let beyond_window = usize::from(distance(expected, seq)) >= self.max_window;

        if duplicate || beyond_window || payload.is_empty() {
            return Some(Delivery {
                ack: expected,
                flushed: Vec::new(),
            });
        }

        self.pending.insert(seq, payload);
        let mut cursor = expected;
        let mut flushed = Vec::new();
        while let Some(chunk) = self.pending.remove(&cursor) {
            cursor = advance(cursor, chunk.len());
            flushed.push(chunk);
        }
        self.expected = Some(cursor);
        Some(Delivery {
            ack: cursor,
            flushed,
        })
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// One STP receiver over a [`Channel`].
pub struct Receiver<C: Channel> {
    channel: C,
    config: ReceiverConfig,
    buffer: ReorderBuffer,
    log: EventLog,
}

impl<C: Channel> Receiver<C> {
    pub fn new(channel: C, config: ReceiverConfig, log: EventLog) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channel,
            buffer: ReorderBuffer::new(config.max_window),
            config,
            log,
        })
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn buffer(&self) -> &ReorderBuffer {
        &self.buffer
    }

    async fn reply(&self, ack: u16) -> Result<()> {
        let segment = Segment::ack(ack);
        log::debug!("[stp:receiver] → ACK {ack}");
        self.log.record(Action::Snd, &segment);
        self.channel
            .send(&segment.encode())
            .await
            .map_err(StpError::from_channel)?;
        Ok(())
    }

    /// Receive and decode one datagram. A malformed datagram comes back as
    /// [`StpError::Segment`]; the caller decides whether that is fatal.
    async fn recv_segment(&self, buf: &mut [u8]) -> Result<Segment> {
        let n = self.channel.recv(buf).await.map_err(StpError::from_channel)?;
        let segment = Segment::decode(&buf[..n])?;
        log::debug!("[stp:receiver] ← {} seq={} len={}", segment.kind, segment.seq, segment.len());
        self.log.record(Action::Rcv, &segment);
        Ok(segment)
    }

    /// Receive one connection's stream into `sink` until FIN (plus linger).
    /// Returns the number of bytes written.
    pub async fn serve<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut written = 0u64;

        let fin_seq = loop {
            let segment = match self.recv_segment(&mut buf).await {
                Ok(segment) => segment,
                Err(StpError::Segment(e)) => {
                    log::warn!("[stp:receiver] discarding datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match segment.kind {
                SegmentType::Syn => {
                    let ack = self.buffer.on_syn(segment.seq);
                    log::info!("[stp:receiver] SYN seq={}, expecting {ack}", segment.seq);
                    self.reply(ack).await?;
                }
                SegmentType::Data => match self.buffer.on_data(segment.seq, segment.payload) {
                    Some(delivery) => {
                        for chunk in &delivery.flushed {
                            sink.write_all(chunk).await?;
                            written += chunk.len() as u64;
                        }
                        self.reply(delivery.ack).await?;
                    }
                    None => log::warn!("[stp:receiver] DATA seq={} before SYN, discarded", segment.seq),
                },
                SegmentType::Fin => break segment.seq,
                SegmentType::Ack => {}
            }
        };

        sink.flush().await?;
        let fin_ack = advance(fin_seq, 1);
        log::info!("[stp:receiver] FIN seq={fin_seq}, {written} byte(s) delivered");
        self.reply(fin_ack).await?;
        self.linger(&mut buf, fin_seq).await;
        self.log.finish().await?;
        Ok(written)
    }

    /// Re-ACK retransmitted FINs until the linger period ends or the peer
    /// goes away.
    async fn linger(&self, buf: &mut [u8], fin_seq: u16) {
        let deadline = Instant::now() + self.config.linger;
        loop {
            match timeout_at(deadline, self.recv_segment(buf)).await {
                Err(_) => break,
                Ok(Err(StpError::Segment(_))) => {}
                Ok(Err(e)) => {
                    log::debug!("[stp:receiver] linger ended early: {e}");
                    break;
                }
                Ok(Ok(segment))
                    if segment.kind == SegmentType::Fin && segment.seq == fin_seq =>
                {
                    if let Err(e) = self.reply(advance(fin_seq, 1)).await {
                        log::debug!("[stp:receiver] linger ended early: {e}");
                        break;
                    }
                }
                Ok(Ok(_)) => {}
            }
        }
    }
}
