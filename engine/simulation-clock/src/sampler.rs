//! Randomized, speed-scaled duration sampling

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{LatencyRange, SimulationSpeed};

/// Draws `U(min, max) * multiplier` durations from a seeded generator.
///
/// Each engine owns its own sampler so that one engine's draws never shift another's.
#[derive(Debug, Clone)]
pub struct DurationSampler {
    rng: StdRng,
    speed: SimulationSpeed,
}

impl DurationSampler {
    pub fn new(seed: u64, speed: SimulationSpeed) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), speed }
    }

    pub fn speed(&self) -> SimulationSpeed {
        self.speed
    }

    /// Sample a scaled duration from `range`
    pub fn sample(&mut self, range: LatencyRange) -> Duration {
        let base_ms = if range.is_fixed() {
            range.min_ms
        } else {
            self.rng.gen_range(range.min_ms..=range.max_ms)
        };
        self.speed.scale(base_ms)
    }
}
