//! Periodic timer driving retransmission and linger checks.
//!
//! Retransmission deadlines are not armed per segment.  Instead one
//! [`Ticker`] fires every [`Config::tick`](crate::config::Config) and the
//! registry sweeps all connections, comparing each oldest segment's send
//! time against the retransmit timeout.

use std::time::{Duration, Instant};

use tokio::time::{self, Interval, MissedTickBehavior};

/// A fixed-period tick source.  Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period);
        // A stalled event loop should not be followed by a burst of ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Wait for the next tick and return the time it was observed.
    ///
    /// The first call completes immediately.  The result is read from the
    /// wall clock rather than the schedule, so it is comparable with
    /// `Instant::now()` taken by other events.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await;
        Instant::now()
    }
}
