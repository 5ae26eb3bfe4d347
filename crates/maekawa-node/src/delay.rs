//! # delay
//!
//! why: spread requests out in time the way a real workload would
//! relations: built from NodeConfig, consumed by the request loop in runtime.rs
//! what: ExponentialDelay

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Exponentially distributed waits between requests and inside the critical section
#[derive(Debug, Clone)]
pub struct ExponentialDelay {
    mean_inter_request_ms: u64,
    mean_cs_ms: u64,
    rng: StdRng,
}

impl ExponentialDelay {
    pub fn new(mean_inter_request_ms: u64, mean_cs_ms: u64) -> Self {
        Self {
            mean_inter_request_ms,
            mean_cs_ms,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence for tests and simulations
    pub fn seeded(mean_inter_request_ms: u64, mean_cs_ms: u64, seed: u64) -> Self {
        Self {
            mean_inter_request_ms,
            mean_cs_ms,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn inter_request(&mut self) -> Duration {
        Duration::from_millis(sample(&mut self.rng, self.mean_inter_request_ms))
    }

    pub fn critical_section(&mut self) -> Duration {
        Duration::from_millis(sample(&mut self.rng, self.mean_cs_ms))
    }
}

impl fmt::Display for ExponentialDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ IR: {}, CS: {} }}", self.mean_inter_request_ms, self.mean_cs_ms)
    }
}

/// Inverse transform: `ceil(-ln(1 - u) * mean)` for uniform `u` in [0, 1)
fn sample(rng: &mut StdRng, mean_ms: u64) -> u64 {
    if mean_ms == 0 {
        return 0;
    }
    let u: f64 = rng.gen();
    (-(1.0 - u).ln() * mean_ms as f64).ceil() as u64
}
