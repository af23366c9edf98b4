//! Per-segment event log.
//!
//! Every segment the sender or receiver transmits, receives, simulates as
//! lost or fast-retransmits produces one [`LogRecord`]. With a writer
//! attached, records are appended to a text file one line each:
//!
//! ```text
//! snd     0.00        SYN    23    0
//! rcv     10.34       ACK    24    0
//! drp     10.51       DATA   24    1000
//! ```
//!
//! Columns: action, milliseconds since the first record, segment type,
//! sequence number, payload bytes. [`EventLog::finish`] appends a summary.
//!
//! Each record is also mirrored to the `log` facade at `debug` level.
//!
//! Only logs built with [`EventLog::new`] keep records in memory. A log with
//! a writer streams lines to a background tokio task and keeps only the
//! running [`Summary`].

use std::fmt::{self, Write as _};
use std::io;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::segment::{Segment, SegmentType};

/// What happened to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Transmitted (first transmission or timeout retransmission).
    Snd,
    /// Received from the peer.
    Rcv,
    /// Simulated as lost; nothing went on the wire.
    Drp,
    /// Fast retransmission after three duplicate ACKs.
    Fst,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Action::Snd => "snd",
            Action::Rcv => "rcv",
            Action::Drp => "drp",
            Action::Fst => "fst",
        })
    }
}

/// One line of the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub action: Action,
    /// Time since the first record of this log.
    pub elapsed: Duration,
    pub kind: SegmentType,
    pub seq: u16,
    pub bytes: usize,
    /// `true` for a timeout retransmission (logged as `snd`).
    pub retransmit: bool,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.elapsed.as_secs_f64() * 1000.0;
        write!(
            f,
            "{:<3}     {:<11} {:<4}   {:<5} {}",
            self.action,
            format!("{ms:.2}"),
            self.kind,
            self.seq,
            self.bytes
        )
    }
}

/// Running totals over everything recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Payload bytes of DATA segments transmitted for the first time
    /// (including ones simulated as lost).
    pub original_bytes: usize,
    /// DATA segments transmitted for the first time.
    pub original_segments: usize,
    /// DATA payload bytes received (duplicates included).
    pub received_bytes: usize,
    pub retransmitted: usize,
    pub fast_retransmitted: usize,
    pub dropped: usize,
    pub duplicate_acks: usize,
}

impl Summary {
    fn apply(&mut self, record: &LogRecord) {
        let data = record.kind == SegmentType::Data;
        match record.action {
            Action::Snd | Action::Drp if record.retransmit => self.retransmitted += 1,
            Action::Snd | Action::Drp if data => {
                self.original_segments += 1;
                self.original_bytes += record.bytes;
            }
            Action::Rcv if data => self.received_bytes += record.bytes,
            Action::Fst => self.fast_retransmitted += 1,
            _ => {}
        }
        if record.action == Action::Drp {
            self.dropped += 1;
        }
    }
}

struct Inner {
    start: Option<Instant>,
    /// `None` when records are not retained.
    records: Option<Vec<LogRecord>>,
    summary: Summary,
    sink: Option<mpsc::UnboundedSender<String>>,
    writer: Option<JoinHandle<io::Result<()>>>,
}

/// Thread-safe segment event log.
pub struct EventLog {
    entity: &'static str,
    inner: Mutex<Inner>,
}

impl EventLog {
    /// An in-memory log. `entity` prefixes debug output (`sender`, `receiver`).
    pub fn new(entity: &'static str) -> Self {
        Self::build(entity, Some(Vec::new()), None, None)
    }

    /// Stream every record to `writer` from a background task. Records are
    /// not kept in memory.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_writer<W>(entity: &'static str, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_lines(writer, rx));
        Self::build(entity, None, Some(tx), Some(task))
    }

    /// Create (truncating) `path` and write records to it.
    pub async fn to_file(entity: &'static str, path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::with_writer(entity, BufWriter::new(file)))
    }

    fn build(
        entity: &'static str,
        records: Option<Vec<LogRecord>>,
        sink: Option<mpsc::UnboundedSender<String>>,
        writer: Option<JoinHandle<io::Result<()>>>,
    ) -> Self {
        Self {
            entity,
            inner: Mutex::new(Inner {
                start: None,
                records,
                summary: Summary::default(),
                sink,
                writer,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, action: Action, segment: &Segment, retransmit: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        let start = *inner.start.get_or_insert(now);
        let record = LogRecord {
            action,
            elapsed: now.duration_since(start),
            kind: segment.kind,
            seq: segment.seq,
            bytes: segment.len(),
            retransmit,
        };

        log::debug!("[stp:{}] {record}", self.entity);
        let closed = inner
            .sink
            .as_ref()
            .is_some_and(|sink| sink.send(format!("{record}\n")).is_err());
        if closed {
            // The writer task stopped on an I/O error; `finish` reports it.
            log::warn!("[stp:{}] event log writer stopped", self.entity);
            inner.sink = None;
        }
        inner.summary.apply(&record);
        if let Some(records) = inner.records.as_mut() {
            records.push(record);
        }
    }

    pub fn record(&self, action: Action, segment: &Segment) {
        self.push(action, segment, false);
    }

    /// Record a timeout retransmission. It is written as `snd` but counted
    /// separately in the summary.
    pub fn record_retransmit(&self, segment: &Segment) {
        self.push(Action::Snd, segment, true);
    }

    pub fn note_duplicate_ack(&self) {
        self.lock().summary.duplicate_acks += 1;
    }

    /// Retained records; always empty for a log with a writer.
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().records.clone().unwrap_or_default()
    }

    pub fn summary(&self) -> Summary {
        self.lock().summary
    }

    /// Append the summary to the writer (if any), then wait for it to flush.
    pub async fn finish(&self) -> io::Result<()> {
        let (s, sink, writer) = {
            let mut inner = self.lock();
            (inner.summary, inner.sink.take(), inner.writer.take())
        };
        log::info!(
            "[stp:{}] done: {} original segment(s), {} retransmitted, {} fast, {} dropped, {} dup ACK(s)",
            self.entity,
            s.original_segments,
            s.retransmitted,
            s.fast_retransmitted,
            s.dropped,
            s.duplicate_acks
        );
        if let Some(sink) = sink {
            // A send error means the task already failed; its result says why.
            let _ = sink.send(summary_text(&s));
        }
        match writer {
            Some(task) => task.await.map_err(io::Error::other)?,
            None => Ok(()),
        }
    }
}

fn summary_text(s: &Summary) -> String {
    let mut text = String::from("\n");
    let rows = [
        ("Original data sent (bytes):", s.original_bytes),
        ("Original segments sent:", s.original_segments),
        ("Data received (bytes):", s.received_bytes),
        ("Segments retransmitted:", s.retransmitted),
        ("Fast retransmissions:", s.fast_retransmitted),
        ("Segments dropped:", s.dropped),
        ("Duplicate ACKs received:", s.duplicate_acks),
    ];
    for (label, value) in rows {
        let _ = writeln!(text, "{label:<32} {value}");
    }
    text
}

async fn write_lines<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer.write_all(line.as_bytes()).await?;
    }
    writer.flush().await
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("entity", &self.entity)
            .field("records", &self.lock().records.as_ref().map_or(0, Vec::len))
            .finish()
    }
}
