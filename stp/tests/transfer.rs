//! End-to-end transfers between a [`Sender`] and a [`Receiver`].
//!
//! The receiver always runs in a background task; the sender is driven from
//! the test task so its event log and channel can be inspected afterwards.

use std::net::SocketAddr;
use std::time::Duration;

use stp::control::ControlBlock;
use stp::event_log::{Action, EventLog, LogRecord};
use stp::receiver::Receiver;
use stp::segment::{Segment, SegmentType};
use stp::simulator::{memory_pair, Lossy, ScriptedLoss};
use stp::state::ConnectionState;
use stp::{Channel, ReceiverConfig, Sender, SenderConfig, Socket, StpError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn sender_config(capacity: usize, rto_ms: u64, isn: u16) -> SenderConfig {
    SenderConfig {
        max_window: capacity * 1000,
        rto: Duration::from_millis(rto_ms),
        isn,
        ..SenderConfig::default()
    }
}

fn scripted_sender<C: Channel>(channel: C, config: &SenderConfig, forward: ScriptedLoss) -> Sender<C> {
    let control = ControlBlock::with_loss(config, Box::new(forward), Box::new(ScriptedLoss::default())).unwrap();
    Sender::with_control(channel, control, config.mss, EventLog::new("sender"))
}

/// Run a receiver on `channel` in the background; yields the bytes it wrote.
fn spawn_receiver<C: Channel>(channel: C) -> tokio::task::JoinHandle<Result<Vec<u8>, StpError>> {
    tokio::spawn(async move {
        let config = ReceiverConfig {
            max_window: 8000,
            linger: Duration::from_millis(100),
            ..ReceiverConfig::default()
        };
        let mut receiver = Receiver::new(channel, config, EventLog::new("receiver"))?;
        let mut output = Vec::new();
        receiver.serve(&mut output).await?;
        Ok(output)
    })
}

async fn finish<C: Channel>(
    sender: &mut Sender<C>,
    input: &[u8],
    receiver: tokio::task::JoinHandle<Result<Vec<u8>, StpError>>,
) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(10), sender.run(input))
        .await
        .expect("transfer timed out")
        .expect("transfer failed");
    assert_eq!(sender.state(), ConnectionState::Finished);
    tokio::time::timeout(Duration::from_secs(5), receiver)
        .await
        .expect("receiver timed out")
        .expect("receiver panicked")
        .expect("receiver failed")
}

fn data_sent(records: &[LogRecord]) -> Vec<&LogRecord> {
    records
        .iter()
        .filter(|r| r.kind == SegmentType::Data && matches!(r.action, Action::Snd | Action::Drp))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Window of two segments, 2500 bytes, ISN 65535: the data sequence numbers
/// wrap to 0 and the last segment is short.
#[tokio::test]
async fn small_window_transfer_wraps_sequence_numbers() {
    let (a, b) = memory_pair();
    let receiver = spawn_receiver(b);
    let config = sender_config(2, 500, 65535);
    let mut sender = scripted_sender(a, &config, ScriptedLoss::default());
    let input = payload(2500);

    let output = finish(&mut sender, &input, receiver).await;
    assert_eq!(output, input);

    let records = sender.event_log().records();
    let data: Vec<(u16, usize)> = data_sent(&records).iter().map(|r| (r.seq, r.bytes)).collect();
    assert_eq!(data, vec![(0, 1000), (1000, 1000), (2000, 500)]);

    // Never more than two segments outstanding.
    let mut outstanding: Vec<u16> = Vec::new();
    for r in &records {
        match (r.action, r.kind) {
            (Action::Snd, SegmentType::Data) if !r.retransmit => {
                outstanding.push(stp::seq::advance(r.seq, r.bytes));
                assert!(outstanding.len() <= 2, "window overrun at seq {}", r.seq);
            }
            (Action::Rcv, SegmentType::Ack) => outstanding.retain(|end| *end > r.seq),
            _ => {}
        }
    }

    let acks: Vec<u16> = records
        .iter()
        .filter(|r| r.action == Action::Rcv && r.kind == SegmentType::Ack)
        .map(|r| r.seq)
        .collect();
    assert!(acks.contains(&2500), "final cumulative ACK missing: {acks:?}");
    assert!(records.iter().any(|r| r.kind == SegmentType::Fin && r.seq == 2500));
    assert_eq!(acks.last(), Some(&2501), "FIN-ACK must be last");
}

/// One forward loss: the very same segment goes out again after a timeout.
#[tokio::test]
async fn lost_segment_is_retransmitted_unchanged() {
    let (a, b) = memory_pair();
    let receiver = spawn_receiver(b);
    // Two slots: a single duplicate ACK, so only the timer can recover.
    let config = sender_config(2, 50, 23);
    // Decision 0 is the SYN; decision 1 the first DATA segment.
    let mut sender = scripted_sender(Lossy::passthrough(a), &config, ScriptedLoss::drop_nth(1));
    let input = payload(3500);

    let output = finish(&mut sender, &input, receiver).await;
    assert_eq!(output, input);

    let records = sender.event_log().records();
    let dropped: Vec<&LogRecord> = records.iter().filter(|r| r.action == Action::Drp).collect();
    assert_eq!(dropped.len(), 1);
    assert_eq!((dropped[0].kind, dropped[0].seq), (SegmentType::Data, 24));

    let resent = records
        .iter()
        .find(|r| r.retransmit)
        .expect("no timeout retransmission");
    assert_eq!((resent.seq, resent.bytes), (24, 1000));
    assert!(resent.elapsed >= dropped[0].elapsed + Duration::from_millis(40));

    // On the wire, seq 24 appears exactly once with the original payload.
    let first: Vec<Segment> = sender
        .channel()
        .delivered()
        .iter()
        .filter_map(|d| Segment::decode(d).ok())
        .filter(|s| s.kind == SegmentType::Data && s.seq == 24)
        .collect();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].payload, input[..1000]);

    assert_eq!(sender.event_log().summary().dropped, 1);
}

/// Losing the first segment of a full window yields three duplicate ACKs
/// and a fast retransmission long before the RTO.
#[tokio::test]
async fn triple_duplicate_ack_triggers_fast_retransmit() {
    let (a, b) = memory_pair();
    let receiver = spawn_receiver(b);
    let mut dropped_once = false;
    let link = Lossy::new(a, move |datagram| {
        let is_data = Segment::decode(datagram).is_ok_and(|s| s.kind == SegmentType::Data);
        let lose = is_data && !dropped_once;
        dropped_once |= lose;
        lose
    });
    let config = sender_config(4, 5000, 23);
    let mut sender = scripted_sender(link, &config, ScriptedLoss::default());
    let input = payload(6000);

    let output = finish(&mut sender, &input, receiver).await;
    assert_eq!(output, input);

    let summary = sender.event_log().summary();
    assert_eq!(summary.fast_retransmitted, 1);
    assert_eq!(summary.retransmitted, 0, "recovery must not wait for the timer");
    assert_eq!(summary.duplicate_acks, 3);

    let records = sender.event_log().records();
    let fst: Vec<&LogRecord> = records.iter().filter(|r| r.action == Action::Fst).collect();
    assert_eq!((fst[0].seq, fst[0].bytes), (24, 1000));
}

#[tokio::test]
async fn empty_input_sends_only_syn_and_fin() {
    let (a, b) = memory_pair();
    let receiver = spawn_receiver(b);
    let config = sender_config(4, 200, 23);
    let mut sender = scripted_sender(a, &config, ScriptedLoss::default());

    let output = finish(&mut sender, &[], receiver).await;
    assert!(output.is_empty());

    let sent: Vec<(SegmentType, u16)> = sender
        .event_log()
        .records()
        .iter()
        .filter(|r| r.action == Action::Snd)
        .map(|r| (r.kind, r.seq))
        .collect();
    assert_eq!(sent, vec![(SegmentType::Syn, 23), (SegmentType::Fin, 24)]);
}

#[tokio::test]
async fn lost_fin_is_resent() {
    let (a, b) = memory_pair();
    let receiver = spawn_receiver(b);
    let config = sender_config(2, 50, 23);
    // Decisions: SYN, DATA, FIN.
    let mut sender = scripted_sender(a, &config, ScriptedLoss::drop_nth(2));
    let input = payload(10);

    let output = finish(&mut sender, &input, receiver).await;
    assert_eq!(output, input);

    let fins: Vec<(Action, bool)> = sender
        .event_log()
        .records()
        .iter()
        .filter(|r| r.kind == SegmentType::Fin)
        .map(|r| (r.action, r.retransmit))
        .collect();
    assert_eq!(fins, vec![(Action::Drp, false), (Action::Snd, true)]);
}

/// The FIN-ACK is lost on the way back: the sender resends its FIN and the
/// lingering receiver acknowledges it again.
#[tokio::test]
async fn lost_fin_ack_is_answered_while_receiver_lingers() {
    let (a, b) = memory_pair();
    // ISN 23 and 10 bytes: DATA 24, FIN 34, FIN-ACK 35.
    let mut dropped_once = false;
    let link = Lossy::new(b, move |datagram| {
        let fin_ack = Segment::decode(datagram).is_ok_and(|s| s.kind == SegmentType::Ack && s.seq == 35);
        let lose = fin_ack && !dropped_once;
        dropped_once |= lose;
        lose
    });
    let receiver = spawn_receiver(link);
    let config = sender_config(2, 50, 23);
    let mut sender = scripted_sender(a, &config, ScriptedLoss::default());
    let input = payload(10);

    let output = finish(&mut sender, &input, receiver).await;
    assert_eq!(output, input);

    let records = sender.event_log().records();
    let fins: Vec<(Action, bool)> = records
        .iter()
        .filter(|r| r.kind == SegmentType::Fin)
        .map(|r| (r.action, r.retransmit))
        .collect();
    assert_eq!(fins, vec![(Action::Snd, false), (Action::Snd, true)]);

    let fin_acks = records
        .iter()
        .filter(|r| r.action == Action::Rcv && r.kind == SegmentType::Ack && r.seq == 35)
        .count();
    assert_eq!(fin_acks, 1, "only the re-ACK reaches the sender");
}

/// The first transmission of DATA 24 and its next two retransmissions are
/// all lost; the timer keeps re-arming until the third one gets through.
#[tokio::test]
async fn repeatedly_lost_segment_keeps_being_retransmitted() {
    let (a, b) = memory_pair();
    let receiver = spawn_receiver(b);
    let mut losses = 0;
    let link = Lossy::new(a, move |datagram| {
        let first_data = Segment::decode(datagram).is_ok_and(|s| s.kind == SegmentType::Data && s.seq == 24);
        let lose = first_data && losses < 3;
        losses += usize::from(lose);
        lose
    });
    // Two slots: never enough duplicate ACKs for a fast retransmit.
    let config = sender_config(2, 50, 23);
    let mut sender = scripted_sender(link, &config, ScriptedLoss::default());
    let input = payload(3500);

    let output = finish(&mut sender, &input, receiver).await;
    assert_eq!(output, input);

    let records = sender.event_log().records();
    let resent: Vec<&LogRecord> = records.iter().filter(|r| r.retransmit).collect();
    assert_eq!(resent.len(), 3);
    assert!(resent.iter().all(|r| (r.kind, r.seq, r.bytes) == (SegmentType::Data, 24, 1000)));
    for pair in resent.windows(2) {
        assert!(pair[1].elapsed >= pair[0].elapsed + Duration::from_millis(40), "timer not re-armed");
    }

    let summary = sender.event_log().summary();
    assert_eq!(summary.retransmitted, 3);
    assert_eq!(summary.fast_retransmitted, 0);

    let arrived = sender
        .channel()
        .delivered()
        .iter()
        .filter_map(|d| Segment::decode(d).ok())
        .filter(|s| s.kind == SegmentType::Data && s.seq == 24)
        .count();
    assert_eq!(arrived, 1);
}

#[tokio::test]
async fn receiver_disappearing_aborts_transfer() {
    let (a, b) = memory_pair();
    drop(b);
    let config = sender_config(2, 50, 23);
    let mut sender = scripted_sender(a, &config, ScriptedLoss::default());

    let err = tokio::time::timeout(Duration::from_secs(5), sender.run(&payload(100)[..]))
        .await
        .expect("run timed out")
        .unwrap_err();
    assert!(matches!(err, StpError::PeerUnreachable));
}

/// Real sockets, random forward and reverse loss.
#[tokio::test]
async fn lossy_transfer_over_udp_loopback() {
    let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let rx = Socket::bind(any).await.unwrap();
    let tx = Socket::bind(any).await.unwrap();
    rx.connect(tx.local_addr).await.unwrap();
    tx.connect(rx.local_addr).await.unwrap();

    let receiver = spawn_receiver(rx);
    let config = SenderConfig {
        forward_loss: 0.2,
        reverse_loss: 0.5,
        seed: Some(7),
        ..sender_config(4, 30, 60_000)
    };
    let mut sender = Sender::new(tx, config, EventLog::new("sender")).unwrap();
    let input = payload(12_345);

    let output = finish(&mut sender, &input, receiver).await;
    assert_eq!(output, input);
}
