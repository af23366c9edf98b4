//! Entry point for `stp`.
//!
//! Parses CLI arguments and dispatches into either **sender** or **receiver**
//! mode. All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing, file handling).

use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use stp::event_log::EventLog;
use stp::{Receiver, ReceiverConfig, Sender, SenderConfig, Socket, DEFAULT_ISN, MSS};

const PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a running receiver.
    Sender {
        /// Local UDP port.
        #[arg(value_parser = parse_port)]
        sender_port: u16,
        /// Receiver's UDP port.
        #[arg(value_parser = parse_port)]
        receiver_port: u16,
        /// File to send.
        file: PathBuf,
        /// Window size in bytes (positive multiple of 1000).
        #[arg(value_parser = parse_window)]
        max_win: usize,
        /// Retransmission timeout in milliseconds.
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        rto: u64,
        /// Forward loss probability for first transmissions.
        #[arg(value_parser = parse_probability)]
        flp: f64,
        /// Reverse loss probability for the handshake ACK.
        #[arg(value_parser = parse_probability)]
        rlp: f64,
        /// Seed for the loss simulation.
        #[arg(long)]
        seed: Option<u64>,
        /// Initial sequence number.
        #[arg(long, default_value_t = DEFAULT_ISN)]
        isn: u16,
        /// Segment log file.
        #[arg(long = "log", default_value = "sender_log.txt")]
        log_file: PathBuf,
    },
    /// Receive a file from a sender.
    Receiver {
        /// Local UDP port.
        #[arg(value_parser = parse_port)]
        receiver_port: u16,
        /// Sender's UDP port.
        #[arg(value_parser = parse_port)]
        sender_port: u16,
        /// Where to write the received bytes.
        file: PathBuf,
        /// Window size in bytes (positive multiple of 1000).
        #[arg(value_parser = parse_window)]
        max_win: usize,
        /// How long to keep answering FIN retransmissions, in milliseconds.
        #[arg(long, default_value_t = 2000)]
        linger_ms: u64,
        /// Segment log file.
        #[arg(long = "log", default_value = "receiver_log.txt")]
        log_file: PathBuf,
    },
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|e| format!("{e}"))?;
    if PORT_RANGE.contains(&port) {
        Ok(port)
    } else {
        Err(format!(
            "port must be in {}..={}",
            PORT_RANGE.start(),
            PORT_RANGE.end()
        ))
    }
}

fn parse_window(s: &str) -> Result<usize, String> {
    let win: usize = s.parse().map_err(|e| format!("{e}"))?;
    if win == 0 || win % MSS != 0 {
        return Err(format!("window must be a positive multiple of {MSS}"));
    }
    Ok(win)
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err("probability must be in [0, 1]".into())
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Sender {
            sender_port,
            receiver_port,
            file,
            max_win,
            rto,
            flp,
            rlp,
            seed,
            isn,
            log_file,
        } => {
            let config = SenderConfig {
                max_window: max_win,
                rto: Duration::from_millis(rto),
                isn,
                forward_loss: flp,
                reverse_loss: rlp,
                seed,
                ..SenderConfig::default()
            };
            config.validate()?;
            let input = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let event_log = EventLog::to_file("sender", &log_file)
                .await
                .with_context(|| format!("creating {}", log_file.display()))?;
            let socket = Socket::open(loopback(sender_port), loopback(receiver_port)).await?;

            log::info!("Sending {} to port {receiver_port}", file.display());
            let mut sender = Sender::new(socket, config, event_log)?;
            sender.run(input).await?;
            sender.event_log().finish().await?;
        }
        Mode::Receiver {
            receiver_port,
            sender_port,
            file,
            max_win,
            linger_ms,
            log_file,
        } => {
            let config = ReceiverConfig {
                max_window: max_win,
                linger: Duration::from_millis(linger_ms),
                ..ReceiverConfig::default()
            };
            config.validate()?;
            let mut output = tokio::fs::File::create(&file)
                .await
                .with_context(|| format!("creating {}", file.display()))?;
            let event_log = EventLog::to_file("receiver", &log_file)
                .await
                .with_context(|| format!("creating {}", log_file.display()))?;
            let socket = Socket::open(loopback(receiver_port), loopback(sender_port)).await?;

            log::info!("Receiving into {} on port {receiver_port}", file.display());
            let mut receiver = Receiver::new(socket, config, event_log)?;
            let written = receiver.serve(&mut output).await?;
            log::info!("Received {written} byte(s)");
        }
    }
    Ok(())
}
