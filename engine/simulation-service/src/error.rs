//! Error types for SimulationService

use request_registry::{Phase, RegistryError, RequestId, WorkerId};
use simulation_clock::ClockError;
use thiserror::Error;

/// Errors that can occur while controlling a simulation
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Simulation is already running")]
    AlreadyRunning,

    #[error("Simulation is not running")]
    NotRunning,

    #[error("Configuration can only change while the simulation is stopped")]
    ReconfigureWhileRunning,

    #[error("Worker {worker} does not exist ({workers} configured)")]
    UnknownWorker { worker: WorkerId, workers: usize },

    #[error("Request {id} is already {phase}, only queued requests can be submitted")]
    NotQueued { id: RequestId, phase: Phase },

    #[error("Request {id} was already handled by worker {worker} in this run")]
    AlreadyHandled { id: RequestId, worker: WorkerId },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}
