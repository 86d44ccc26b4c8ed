//! Configuration for a simulation run

use std::path::Path;

use serde::{Deserialize, Serialize};
use simulation_clock::{LatencyProfile, SimulationSpeed, TickSchedule};
use thread_pool::{MAX_POOL_SIZE, MIN_POOL_SIZE};
use worker_process::WorkerConfig;

use crate::error::SimError;
use crate::{
    DEFAULT_AUTO_STOP_GRACE_MS, DEFAULT_BATCH_DELAY_MS, MAX_BATCH_REQUESTS, MAX_WORKERS,
    MIN_WORKERS,
};

/// Configuration for the simulation.
///
/// Out-of-range values are clamped by [`SimulationConfig::clamped`], never rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Independent worker replicas (1-8)
    pub num_workers: usize,

    /// Threads per worker pool (1-16)
    pub thread_pool_size: usize,

    /// Speed selector (1-10), scales every modeled duration by `11 - speed`
    pub simulation_speed: SimulationSpeed,

    /// Async requests created when a run starts (0-50)
    pub async_requests: usize,

    /// Sync requests created when a run starts (0-50)
    pub sync_requests: usize,

    /// Observational connection pool size per worker, unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_call_capacity: Option<usize>,

    /// Delay before the initial batch is created
    pub batch_delay_ms: u64,

    /// Stop the run once it drains
    pub auto_stop: bool,

    /// How long a drained run waits before stopping
    pub auto_stop_grace_ms: u64,

    /// Seed for every random draw, chosen at random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    pub ticks: TickSchedule,

    pub latency: LatencyProfile,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            thread_pool_size: 4,
            simulation_speed: SimulationSpeed::default(),
            async_requests: 0,
            sync_requests: 0,
            external_call_capacity: None,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            auto_stop: true,
            auto_stop_grace_ms: DEFAULT_AUTO_STOP_GRACE_MS,
            seed: None,
            ticks: TickSchedule::default(),
            latency: LatencyProfile::default(),
        }
    }
}

impl SimulationConfig {
    /// Bring every field into its allowed range
    pub fn clamped(self) -> Self {
        let clamped = Self {
            num_workers: self.num_workers.clamp(MIN_WORKERS, MAX_WORKERS),
            thread_pool_size: self.thread_pool_size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE),
            simulation_speed: SimulationSpeed::new(self.simulation_speed.get()),
            async_requests: self.async_requests.min(MAX_BATCH_REQUESTS),
            sync_requests: self.sync_requests.min(MAX_BATCH_REQUESTS),
            external_call_capacity: self.external_call_capacity.map(|c| c.max(1)),
            ticks: TickSchedule {
                event_loop_base_ms: self.ticks.event_loop_base_ms.max(1),
                thread_pool_ms: self.ticks.thread_pool_ms.max(1),
            },
            ..self.clone()
        };
        if clamped != self {
            tracing::warn!(?clamped, "Simulation configuration clamped into range");
        }
        clamped
    }

    /// Requests in the initial batch
    pub fn batch_size(&self) -> usize {
        self.async_requests + self.sync_requests
    }

    /// Construction parameters for one worker. Each worker draws from its own seed.
    pub fn worker_config(&self, seed: u64, worker: usize) -> WorkerConfig {
        WorkerConfig {
            thread_pool_size: self.thread_pool_size,
            speed: self.simulation_speed,
            latency: self.latency,
            ticks: self.ticks,
            external_call_capacity: self.external_call_capacity,
            seed: seed.wrapping_add(worker as u64),
        }
    }

    /// Whether switching to `other` needs the workers rebuilt rather than resized
    pub(crate) fn changes_workers(&self, other: &SimulationConfig) -> bool {
        self.num_workers != other.num_workers
            || self.simulation_speed != other.simulation_speed
            || self.latency != other.latency
            || self.ticks != other.ticks
            || self.external_call_capacity != other.external_call_capacity
            || self.seed != other.seed
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path)?;
        let config: SimulationConfig = toml::from_str(&content)?;
        Ok(config.clamped())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
