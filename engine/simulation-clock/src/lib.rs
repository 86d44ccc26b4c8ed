//! # SimulationClock
//!
//! The heartbeat of the simulator. Every timed transition in the system (recurring engine
//! ticks, phase timers, the external-call latency) is an entry in a discrete-event
//! [`Scheduler`] driven by a virtual clock, so a whole run can be replayed deterministically
//! by advancing virtual time instead of waiting on wall-clock timers.

pub mod clock;
pub mod config;
pub mod error;
pub mod sampler;


pub use clock::{MapTimeline, Scheduled, Scheduler, SimTime, Timeline};
pub use config::{
    EventLoopLatency, LatencyProfile, LatencyRange, SimulationSpeed, ThreadPoolLatency,
    TickSchedule,
};
pub use error::ClockError;
pub use sampler::DurationSampler;

/// Current version of the SimulationClock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Slowest selectable simulation speed
pub const MIN_SIMULATION_SPEED: u8 = 1;

/// Fastest selectable simulation speed (multiplier 1)
pub const MAX_SIMULATION_SPEED: u8 = 10;

/// Default simulation speed
pub const DEFAULT_SIMULATION_SPEED: u8 = 5;

/// Base cadence of the event loop queue tick, before speed scaling
pub const DEFAULT_EVENT_LOOP_TICK_MS: u64 = 100;

/// Cadence of the thread pool assignment tick
pub const DEFAULT_THREAD_POOL_TICK_MS: u64 = 500;
