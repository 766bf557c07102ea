//! Seeded fault injection for exercising the engine without a network.
//!
//! Real networks drop, reorder, duplicate and damage datagrams.  The
//! [`Simulator`] applies the same faults to batches of raw datagrams moving
//! between two in-memory channels, so every recovery path can be driven
//! from a unit test and replayed from its seed:
//!
//! | Fault        | Description                                          |
//! |--------------|------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.        |
//! | Corruption   | Flip one random bit.                                 |
//! | Truncation   | Cut the datagram short at a random length.           |
//! | Duplication  | Deliver a datagram twice.                            |
//! | Reordering   | Swap a datagram with its predecessor in the batch.   |

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration for the fault model.
///
/// All probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub corrupt_rate: f64,
    pub truncate_rate: f64,
}

impl SimulatorConfig {
    /// Every fault at the same probability.
    pub fn uniform(rate: f64) -> Self {
        Self {
            loss_rate: rate,
            duplicate_rate: rate,
            reorder_rate: rate,
            corrupt_rate: rate,
            truncate_rate: rate,
        }
    }

    fn clamped(self) -> Self {
        let c = |p: f64| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        Self {
            loss_rate: c(self.loss_rate),
            duplicate_rate: c(self.duplicate_rate),
            reorder_rate: c(self.reorder_rate),
            corrupt_rate: c(self.corrupt_rate),
            truncate_rate: c(self.truncate_rate),
        }
    }
}

/// Counts of faults applied so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub corrupted: u64,
    pub truncated: u64,
}

/// A fault-injecting link between two endpoints.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    stats: SimStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig, seed: u64) -> Self {
        Self {
            config: config.clamped(),
            rng: StdRng::seed_from_u64(seed),
            stats: SimStats::default(),
        }
    }

    /// A link that forwards everything untouched.
    pub fn passthrough() -> Self {
        Self::new(SimulatorConfig::default(), 0)
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Push a batch of datagrams across the link and return what arrives.
    pub fn transmit(&mut self, datagrams: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(datagrams.len());

        for mut datagram in datagrams {
            if self.rng.random_bool(self.config.loss_rate) {
                log::trace!("[sim] dropped {} byte datagram", datagram.len());
                self.stats.dropped += 1;
                continue;
            }
            if !datagram.is_empty() && self.rng.random_bool(self.config.corrupt_rate) {
                let bit = self.rng.random_range(0..datagram.len() * 8);
                datagram[bit / 8] ^= 1 << (bit % 8);
                self.stats.corrupted += 1;
            }
            if datagram.len() > 1 && self.rng.random_bool(self.config.truncate_rate) {
                let keep = self.rng.random_range(1..datagram.len());
                datagram.truncate(keep);
                self.stats.truncated += 1;
            }
            if self.rng.random_bool(self.config.duplicate_rate) {
                out.push(datagram.clone());
                self.stats.duplicated += 1;
            }
            out.push(datagram);
        }

        for i in 1..out.len() {
            if self.rng.random_bool(self.config.reorder_rate) {
                out.swap(i - 1, i);
                self.stats.reordered += 1;
            }
        }

        self.stats.forwarded += out.len() as u64;
        out
    }
}
