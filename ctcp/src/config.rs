//! Per-connection configuration.
//!
//! Values are fixed when a connection is established and never change
//! afterwards.  The binary fills them from command-line flags.

use std::time::Duration;

use thiserror::Error;

use crate::segment::MAX_SEGMENT_DATA;

/// Adjustable protocol parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bytes the peer may send beyond our last delivered byte.
    pub recv_window: u32,
    /// Bytes we may have outstanding beyond the peer's last acknowledgement.
    pub send_window: u32,
    /// Interval between timer ticks.
    pub tick: Duration,
    /// Time after which the oldest unacknowledged segment is resent.
    pub retransmit_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recv_window: MAX_SEGMENT_DATA as u32,
            send_window: MAX_SEGMENT_DATA as u32,
            tick: Duration::from_millis(40),
            retransmit_timeout: Duration::from_millis(200),
        }
    }
}

impl Config {
    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recv_window == 0 {
            return Err(ConfigError::ZeroWindow("recv_window"));
        }
        if self.send_window == 0 {
            return Err(ConfigError::ZeroWindow("send_window"));
        }
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroDuration("tick"));
        }
        if self.retransmit_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("retransmit_timeout"));
        }
        Ok(())
    }

    /// Largest payload put into one segment.
    ///
    /// A segment larger than the send window could never be sent.
    pub fn segment_size(&self) -> usize {
        MAX_SEGMENT_DATA.min(self.send_window as usize)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be at least one byte")]
    ZeroWindow(&'static str),
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
}
