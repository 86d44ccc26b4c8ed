//! Speed and latency configuration for the simulated timeline

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_EVENT_LOOP_TICK_MS, DEFAULT_SIMULATION_SPEED, DEFAULT_THREAD_POOL_TICK_MS,
    MAX_SIMULATION_SPEED, MIN_SIMULATION_SPEED,
};

/// Observer-selected speed, 1 (slowest) to 10 (fastest).
///
/// Every modeled duration is multiplied by `11 - speed`, so changing the speed stretches the
/// whole timeline without changing relative ordering or proportions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct SimulationSpeed(u8);

impl SimulationSpeed {
    /// Clamp `speed` into the selectable range
    pub fn new(speed: u8) -> Self {
        Self(speed.clamp(MIN_SIMULATION_SPEED, MAX_SIMULATION_SPEED))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Scalar applied to all modeled durations
    pub fn multiplier(self) -> u64 {
        u64::from(MAX_SIMULATION_SPEED + 1 - self.0)
    }

    /// Scale a base duration in milliseconds
    pub fn scale(self, base_ms: u64) -> Duration {
        Duration::from_millis(base_ms.saturating_mul(self.multiplier()))
    }
}

impl Default for SimulationSpeed {
    fn default() -> Self {
        Self(DEFAULT_SIMULATION_SPEED)
    }
}

impl From<u8> for SimulationSpeed {
    fn from(speed: u8) -> Self {
        Self::new(speed)
    }
}

impl From<SimulationSpeed> for u8 {
    fn from(speed: SimulationSpeed) -> Self {
        speed.0
    }
}

/// Uniform duration range in milliseconds, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    /// Range with the bounds put in order
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms: min_ms.min(max_ms), max_ms: min_ms.max(max_ms) }
    }

    /// A range that always yields `ms`
    pub fn fixed(ms: u64) -> Self {
        Self { min_ms: ms, max_ms: ms }
    }

    pub fn is_fixed(&self) -> bool {
        self.min_ms == self.max_ms
    }

    /// Whether a sampled, already-scaled duration could have come from this range
    pub fn contains_scaled(&self, duration: Duration, speed: SimulationSpeed) -> bool {
        duration >= speed.scale(self.min_ms) && duration <= speed.scale(self.max_ms)
    }
}

/// Durations of the three event loop phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopLatency {
    /// Execution before the task reaches its await point
    pub pre_call: LatencyRange,
    /// Time spent in the external call while suspended
    pub external_call: LatencyRange,
    /// Execution after the task resumes
    pub post_call: LatencyRange,
}

impl Default for EventLoopLatency {
    fn default() -> Self {
        Self {
            pre_call: LatencyRange::new(300, 500),
            external_call: LatencyRange::new(600, 1000),
            post_call: LatencyRange::new(200, 400),
        }
    }
}

/// Durations of a thread pool task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPoolLatency {
    /// Time until the thread reaches the blocking call
    pub pre_call: LatencyRange,
    /// Blocking external call, slot held throughout
    pub external_call: LatencyRange,
}

impl Default for ThreadPoolLatency {
    fn default() -> Self {
        Self { pre_call: LatencyRange::fixed(800), external_call: LatencyRange::new(800, 1400) }
    }
}

/// All modeled durations, before speed scaling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyProfile {
    pub event_loop: EventLoopLatency,
    pub thread_pool: ThreadPoolLatency,
}

/// Cadence of the recurring engine ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSchedule {
    /// Event loop queue check, scaled by the speed multiplier
    pub event_loop_base_ms: u64,
    /// Thread pool assignment scan, not scaled
    pub thread_pool_ms: u64,
}

impl Default for TickSchedule {
    fn default() -> Self {
        Self {
            event_loop_base_ms: DEFAULT_EVENT_LOOP_TICK_MS,
            thread_pool_ms: DEFAULT_THREAD_POOL_TICK_MS,
        }
    }
}

impl TickSchedule {
    pub fn event_loop_interval(&self, speed: SimulationSpeed) -> Duration {
        speed.scale(self.event_loop_base_ms)
    }

    pub fn thread_pool_interval(&self) -> Duration {
        Duration::from_millis(self.thread_pool_ms)
    }
}
