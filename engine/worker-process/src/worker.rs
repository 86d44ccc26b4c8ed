use std::collections::BTreeSet;

use event_loop::EventLoopEngine;
use external_call_stage::{ExternalCallEntry, ExternalCallStage};
use request_registry::{
    CallAction, DbPhase, EngineEvent, Phase, Request, RequestId, RequestType, WorkerId,
};
use simulation_clock::{DurationSampler, MapTimeline, SimTime, Timeline};
use thread_pool::ThreadPoolEngine;

use crate::snapshot::{ThreadView, WorkerSnapshot};
use crate::types::{WorkerConfig, WorkerEvent, WorkerNotice};

// Keeps the pool's draws independent of the event loop's for the same worker seed.
const THREAD_POOL_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Composes one event loop, one thread pool and the external call stage they share.
///
/// The worker is a router and an aggregation point: it holds no scheduling logic of its own.
#[derive(Debug)]
pub struct WorkerProcess {
    id: WorkerId,
    config: WorkerConfig,
    event_loop: EventLoopEngine,
    thread_pool: ThreadPoolEngine,
    external_calls: ExternalCallStage,
    event_loop_tasks: BTreeSet<RequestId>,
    thread_pool_tasks: BTreeSet<RequestId>,
    outbox: Vec<EngineEvent>,
}

impl WorkerProcess {
    pub fn new(id: WorkerId, config: WorkerConfig) -> Self {
        let event_loop = EventLoopEngine::new(
            config.latency.event_loop,
            DurationSampler::new(config.seed, config.speed),
        );
        let thread_pool = ThreadPoolEngine::new(
            config.thread_pool_size,
            config.latency.thread_pool,
            DurationSampler::new(config.seed ^ THREAD_POOL_SEED_SALT, config.speed),
        );
        let external_calls = ExternalCallStage::with_capacity(config.external_call_capacity);

        Self {
            id,
            config,
            event_loop,
            thread_pool,
            external_calls,
            event_loop_tasks: BTreeSet::new(),
            thread_pool_tasks: BTreeSet::new(),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Arm the recurring engine ticks
    pub fn start<T>(&mut self, timeline: &mut T)
    where
        T: Timeline<WorkerEvent> + ?Sized,
    {
        let event_loop_every = self.config.ticks.event_loop_interval(self.config.speed);
        let thread_pool_every = self.config.ticks.thread_pool_interval();
        timeline.schedule_every(event_loop_every, WorkerEvent::EventLoopTick);
        timeline.schedule_every(thread_pool_every, WorkerEvent::ThreadPoolTick);
        tracing::debug!(
            worker = self.id,
            ?event_loop_every,
            ?thread_pool_every,
            "Worker ticks armed"
        );
    }

    /// Hand a queued request to the engine for its type.
    ///
    /// Returns the request's new phase, or `None` if it was not queued, belongs to another
    /// worker, or was already routed.
    pub fn route(&mut self, request: &Request, now: SimTime) -> Option<Phase> {
        if !request.is_queued() || request.worker_id != self.id {
            return None;
        }

        // the engine ledger decides; the task sets only follow what it accepted
        let accepted = match request.kind {
            RequestType::Async => {
                let accepted = self.event_loop.submit(request, now);
                if accepted {
                    self.event_loop_tasks.insert(request.id);
                }
                accepted
            }
            RequestType::Sync => {
                let accepted = self.thread_pool.submit(request, now);
                if accepted {
                    self.thread_pool_tasks.insert(request.id);
                }
                accepted
            }
        };
        if !accepted {
            tracing::debug!(worker = self.id, request_id = request.id, "Request already routed");
            return None;
        }

        let phase = Phase::routed(request.kind);
        tracing::debug!(worker = self.id, request_id = request.id, %phase, "Request routed");
        Some(phase)
    }

    /// Whether the engine for `kind` has seen `id` since the last reset, completed or not
    pub fn is_known(&self, id: RequestId, kind: RequestType) -> bool {
        match kind {
            RequestType::Async => self.event_loop.task_state(id).is_some(),
            RequestType::Sync => self.thread_pool.task_state(id).is_some(),
        }
    }

    /// Handle one of this worker's scheduled events
    pub fn handle<T>(&mut self, event: WorkerEvent, timeline: &mut T) -> Vec<WorkerNotice>
    where
        T: Timeline<WorkerEvent> + ?Sized,
    {
        let now = timeline.now();
        let mut outbox = std::mem::take(&mut self.outbox);

        match event {
            WorkerEvent::EventLoopTick => {
                let mut timers = MapTimeline::new(timeline, WorkerEvent::EventLoop);
                self.event_loop.tick(&mut timers, &mut outbox);
            }
            WorkerEvent::ThreadPoolTick => {
                let mut timers = MapTimeline::new(timeline, WorkerEvent::ThreadPool);
                self.thread_pool.tick(&mut timers, &mut outbox);
            }
            WorkerEvent::EventLoop(timer) => {
                let mut timers = MapTimeline::new(timeline, WorkerEvent::EventLoop);
                self.event_loop.on_timer(timer, &mut timers, &mut outbox);
            }
            WorkerEvent::ThreadPool(timer) => {
                let mut timers = MapTimeline::new(timeline, WorkerEvent::ThreadPool);
                self.thread_pool.on_timer(timer, &mut timers, &mut outbox);
            }
        }

        let notices = outbox.drain(..).filter_map(|event| self.apply(event, now)).collect();
        self.outbox = outbox;
        notices
    }

    fn apply(&mut self, event: EngineEvent, now: SimTime) -> Option<WorkerNotice> {
        match event {
            EngineEvent::TaskStarted { id, kind, db_phase, slot } => {
                Some(WorkerNotice::TaskProgress { id, kind, db_phase, slot })
            }
            EngineEvent::ExternalCall { id, kind, action: CallAction::Add } => {
                let entry = ExternalCallEntry { id, kind, worker_id: self.id, started_at: now };
                if !self.external_calls.add(entry.clone()) {
                    return None;
                }
                Some(WorkerNotice::ExternalCallChanged {
                    id,
                    action: CallAction::Add,
                    entry: Some(entry),
                })
            }
            EngineEvent::ExternalCall { id, action: CallAction::Remove, .. } => {
                let entry = self.external_calls.remove(id);
                if entry.is_none() {
                    tracing::warn!(worker = self.id, request_id = id, "Unknown external call removed");
                }
                Some(WorkerNotice::ExternalCallChanged { id, action: CallAction::Remove, entry })
            }
            EngineEvent::Completed { id, kind } => {
                self.complete_task(id, kind);
                Some(WorkerNotice::Completed { id, kind })
            }
        }
    }

    /// Drop a finished request from the worker's routing bookkeeping
    pub fn complete_task(&mut self, id: RequestId, kind: RequestType) -> bool {
        match kind {
            RequestType::Async => self.event_loop_tasks.remove(&id),
            RequestType::Sync => self.thread_pool_tasks.remove(&id),
        }
    }

    /// Clear both engines and the external call stage (simulation stop)
    pub fn reset(&mut self) {
        self.event_loop.reset();
        self.thread_pool.reset();
        self.external_calls.clear();
        self.event_loop_tasks.clear();
        self.thread_pool_tasks.clear();
        self.outbox.clear();
    }

    /// Rebuild the thread pool with a new size, dropping any sync work in flight
    pub fn resize_thread_pool(&mut self, size: usize) {
        self.thread_pool.resize(size);
        self.thread_pool_tasks.clear();
        self.config.thread_pool_size = self.thread_pool.size();
    }

    pub fn event_loop(&self) -> &EventLoopEngine {
        &self.event_loop
    }

    pub fn thread_pool(&self) -> &ThreadPoolEngine {
        &self.thread_pool
    }

    pub fn external_calls(&self) -> &ExternalCallStage {
        &self.external_calls
    }

    /// Requests routed here and not yet completed
    pub fn active_tasks(&self) -> usize {
        self.event_loop_tasks.len() + self.thread_pool_tasks.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active_tasks() == 0 && self.external_calls.is_empty()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let threads: Vec<ThreadView> = self
            .thread_pool
            .slots()
            .iter()
            .map(|slot| ThreadView {
                id: slot.id,
                busy: slot.is_busy(),
                task: slot.current_task().map(|task| task.id),
            })
            .collect();

        WorkerSnapshot {
            worker_id: self.id,
            event_loop_queue: self.event_loop.queued().map(|t| (t.id, !t.is_new_task)).collect(),
            event_loop_executing: self.event_loop.executing().map(|t| (t.id, t.db_phase)),
            event_loop_awaiting: self.event_loop.awaiting_external(),
            thread_pool_queue: self.thread_pool.queued().map(|t| t.id).collect(),
            busy_threads: threads.iter().filter(|t| t.busy).count(),
            pool_size: threads.len(),
            threads,
            external_calls: self.external_calls.entries().to_vec(),
            connection_pool: self.external_calls.connection_view(),
            event_loop_tasks: self.event_loop_tasks.len(),
            thread_pool_tasks: self.thread_pool_tasks.len(),
        }
    }
}

impl WorkerNotice {
    pub fn id(&self) -> RequestId {
        match self {
            WorkerNotice::TaskProgress { id, .. }
            | WorkerNotice::ExternalCallChanged { id, .. }
            | WorkerNotice::Completed { id, .. } => *id,
        }
    }

    /// The db-phase this notice moves its task into, if any
    pub fn db_phase(&self) -> Option<DbPhase> {
        match self {
            WorkerNotice::TaskProgress { db_phase, .. } => Some(*db_phase),
            WorkerNotice::ExternalCallChanged { action: CallAction::Add, .. } => {
                Some(DbPhase::DbOperation)
            }
            _ => None,
        }
    }
}
