//! Connection parameters for both ends.

use std::time::Duration;

use crate::error::{Result, StpError};

/// Maximum segment size: payload bytes carried by one DATA segment.
pub const MSS: usize = 1000;

/// Initial sequence number used when none is configured.
pub const DEFAULT_ISN: u16 = 23;

/// Largest window that keeps the half-space ordering rule unambiguous.
pub const MAX_WINDOW: usize = 32_767;

/// How long the receiver keeps answering retransmitted FINs.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(2);

/// Sender-side settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderConfig {
    pub mss: usize,
    /// Window size in bytes; must be a positive multiple of `mss`.
    pub max_window: usize,
    /// Fixed retransmission timeout.
    pub rto: Duration,
    pub isn: u16,
    /// Probability in `[0, 1]` that a first transmission is treated as lost.
    pub forward_loss: f64,
    /// Probability in `[0, 1]` that the handshake ACK is treated as lost.
    pub reverse_loss: f64,
    /// Seed for the loss models; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            mss: MSS,
            max_window: 4 * MSS,
            rto: Duration::from_millis(200),
            isn: DEFAULT_ISN,
            forward_loss: 0.0,
            reverse_loss: 0.0,
            seed: None,
        }
    }
}

impl SenderConfig {
    /// Check invariants the sender relies on.
    pub fn validate(&self) -> Result<()> {
        validate_window(self.max_window, self.mss)?;
        if self.rto.is_zero() {
            return Err(StpError::Config("rto must be positive".into()));
        }
        for (name, p) in [
            ("forward loss", self.forward_loss),
            ("reverse loss", self.reverse_loss),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(StpError::Config(format!(
                    "{name} probability {p} is outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// Number of window slots.
    pub fn capacity(&self) -> usize {
        self.max_window / self.mss
    }
}

/// Receiver-side settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub mss: usize,
    pub max_window: usize,
    /// Time to keep re-acknowledging FINs after the first one.
    pub linger: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            mss: MSS,
            max_window: 4 * MSS,
            linger: DEFAULT_LINGER,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.max_window, self.mss)
    }
}

fn validate_window(max_window: usize, mss: usize) -> Result<()> {
    if mss == 0 {
        return Err(StpError::Config("mss must be positive".into()));
    }
    if max_window == 0 || max_window % mss != 0 {
        return Err(StpError::Config(format!(
            "window {max_window} is not a positive multiple of {mss}"
        )));
    }
    if max_window > MAX_WINDOW {
        return Err(StpError::Config(format!(
            "window {max_window} exceeds {MAX_WINDOW} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SenderConfig::default().validate().is_ok());
        assert!(ReceiverConfig::default().validate().is_ok());
        assert_eq!(SenderConfig::default().isn, 23);
    }

    #[test]
    fn capacity_is_window_over_mss() {
        let cfg = SenderConfig {
            max_window: 5000,
            ..SenderConfig::default()
        };
        assert_eq!(cfg.capacity(), 5);
    }

    #[test]
    fn rejects_unaligned_or_empty_window() {
        for max_window in [0, 1500, 999] {
            let cfg = SenderConfig {
                max_window,
                ..SenderConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(StpError::Config(_))), "{max_window}");
        }
    }

    #[test]
    fn rejects_window_past_half_sequence_space() {
        let cfg = ReceiverConfig {
            max_window: 33_000,
            ..ReceiverConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_probabilities() {
        let cfg = SenderConfig {
            forward_loss: 1.5,
            ..SenderConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = SenderConfig {
            reverse_loss: -0.1,
            ..SenderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_rto() {
        let cfg = SenderConfig {
            rto: Duration::ZERO,
            ..SenderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
