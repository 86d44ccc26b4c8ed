use external_call_stage::{ConnectionPoolView, ExternalCallEntry};
use request_registry::{DbPhase, RequestId, WorkerId};
use serde::{Deserialize, Serialize};

/// Occupancy of one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadView {
    pub id: usize,
    pub busy: bool,
    pub task: Option<RequestId>,
}

/// Read-only view of a worker for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub worker_id: WorkerId,
    /// Event loop queue, head first, with whether each entry is a resumed task
    pub event_loop_queue: Vec<(RequestId, bool)>,
    pub event_loop_executing: Option<(RequestId, DbPhase)>,
    pub event_loop_awaiting: usize,
    pub thread_pool_queue: Vec<RequestId>,
    pub threads: Vec<ThreadView>,
    pub busy_threads: usize,
    pub pool_size: usize,
    pub external_calls: Vec<ExternalCallEntry>,
    pub connection_pool: Option<ConnectionPoolView>,
    /// Requests routed to each engine and not yet completed
    pub event_loop_tasks: usize,
    pub thread_pool_tasks: usize,
}

impl WorkerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.event_loop_tasks == 0 && self.thread_pool_tasks == 0 && self.external_calls.is_empty()
    }
}
