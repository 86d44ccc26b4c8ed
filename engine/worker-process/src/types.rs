use event_loop::EventLoopTimer;
use external_call_stage::ExternalCallEntry;
use request_registry::{CallAction, DbPhase, RequestId, RequestType};
use simulation_clock::{LatencyProfile, SimulationSpeed, TickSchedule};
use thread_pool::ThreadPoolTimer;

/// Everything a worker schedules on the shared timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerEvent {
    /// Recurring event loop queue check
    EventLoopTick,
    /// Recurring thread pool assignment scan
    ThreadPoolTick,
    EventLoop(EventLoopTimer),
    ThreadPool(ThreadPoolTimer),
}

/// What a worker reports to the simulation after handling an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerNotice {
    /// A task moved between pre-await, db-operation and post-await
    TaskProgress { id: RequestId, kind: RequestType, db_phase: DbPhase, slot: Option<usize> },
    /// The external call stage gained or lost an entry
    ExternalCallChanged { id: RequestId, action: CallAction, entry: Option<ExternalCallEntry> },
    /// A request is fully finished
    Completed { id: RequestId, kind: RequestType },
}

/// Construction parameters of a worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub thread_pool_size: usize,
    pub speed: SimulationSpeed,
    pub latency: LatencyProfile,
    pub ticks: TickSchedule,
    pub external_call_capacity: Option<usize>,
    pub seed: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 4,
            speed: SimulationSpeed::default(),
            latency: LatencyProfile::default(),
            ticks: TickSchedule::default(),
            external_call_capacity: None,
            seed: 0,
        }
    }
}
