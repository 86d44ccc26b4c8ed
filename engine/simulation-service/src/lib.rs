//! # SimulationService
//!
//! Top-level run controller. A [`Simulation`] owns the request registry and the id counter of
//! the current run, builds one [`worker_process::WorkerProcess`] per configured worker and
//! drives all of them on a single virtual timeline. Everything the presentation layer needs to
//! know is reported through a [`SimulationObserver`].
//!
//! Runs are started and stopped explicitly. A run also stops on its own once it has drained:
//! when the last request completes and nothing new arrives within a short grace period.

pub mod config;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod simulation;


#[cfg(test)]
mod integration_tests;

pub use config::SimulationConfig;
pub use error::SimError;
pub use metrics::{LatencySummary, MetricsCollector, SimulationMetrics};
pub use observer::{NoopObserver, ObservedEvent, RecordingObserver, SimulationObserver, StopReason};
pub use simulation::{SimEvent, Simulation, SimulationSnapshot};

/// Re-export commonly used types
pub use request_registry::{CallAction, DbPhase, Phase, Request, RequestId, RequestType};
pub use simulation_clock::{SimTime, SimulationSpeed};

/// Current version of the SimulationService
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fewest workers a simulation can run
pub const MIN_WORKERS: usize = 1;

/// Most workers a simulation can run
pub const MAX_WORKERS: usize = 8;

/// Largest initial batch of either request type
pub const MAX_BATCH_REQUESTS: usize = 50;

/// Nominal connection pool size used when a capacity is requested without a number
pub const DEFAULT_DB_POOL_SIZE: usize = 8;

/// Delay between starting a run and creating its initial batch
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;

/// How long a drained run waits for new requests before stopping itself
pub const DEFAULT_AUTO_STOP_GRACE_MS: u64 = 1500;
