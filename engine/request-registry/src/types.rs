use serde::{Deserialize, Serialize};
use simulation_clock::SimTime;
use std::fmt;

/// Request identifier, unique within a simulation run
pub type RequestId = u64;

/// Index of the worker replica a request is assigned to
pub type WorkerId = usize;

/// Which discipline handles a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// Cooperative, handled by the event loop
    Async,
    /// Blocking, handled by the thread pool
    Sync,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::Async => write!(f, "async"),
            RequestType::Sync => write!(f, "sync"),
        }
    }
}

/// Coarse, presentation-facing phase of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Queued,
    EventLoop,
    ThreadPool,
}

impl Phase {
    /// Phase a request of `kind` moves to once routed
    pub fn routed(kind: RequestType) -> Self {
        match kind {
            RequestType::Async => Phase::EventLoop,
            RequestType::Sync => Phase::ThreadPool,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Queued => write!(f, "queued"),
            Phase::EventLoop => write!(f, "event-loop"),
            Phase::ThreadPool => write!(f, "thread-pool"),
        }
    }
}

/// Status reported alongside phase changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
}

/// Where a task is relative to its external call (display only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbPhase {
    PreAwait,
    DbOperation,
    PostAwait,
}

/// A unit of work submitted to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub kind: RequestType,
    pub phase: Phase,
    pub status: RequestStatus,
    pub worker_id: WorkerId,
    pub start_time: SimTime,
}

impl Request {
    /// A freshly created request, not yet routed
    pub fn new(id: RequestId, kind: RequestType, worker_id: WorkerId, start_time: SimTime) -> Self {
        Self { id, kind, phase: Phase::Queued, status: RequestStatus::Pending, worker_id, start_time }
    }

    pub fn is_queued(&self) -> bool {
        self.phase == Phase::Queued
    }
}
