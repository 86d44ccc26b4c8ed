//! The simulation run controller

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use request_registry::{
    Request, RequestId, RequestIdAllocator, RequestRegistry, RequestStatus, RequestType, WorkerId,
};
use serde::{Deserialize, Serialize};
use simulation_clock::{MapTimeline, Scheduler, SimTime, Timeline};
use worker_process::{WorkerEvent, WorkerNotice, WorkerProcess, WorkerSnapshot};

use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::metrics::{MetricsCollector, Occupancy, SimulationMetrics};
use crate::observer::{NoopObserver, SimulationObserver, StopReason};

/// Everything the simulation schedules on its timeline. Each event carries the run it belongs
/// to; events from an earlier run are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Create the initial batch of requests
    SeedBatch { run: u64 },
    /// Hand a registered request to its worker
    Route { run: u64, id: RequestId },
    /// A worker's tick or engine timer
    Worker { run: u64, worker: WorkerId, event: WorkerEvent },
    /// Stop the run if it is still drained
    AutoStop { run: u64 },
}

impl SimEvent {
    pub fn run(&self) -> u64 {
        match *self {
            SimEvent::SeedBatch { run }
            | SimEvent::Route { run, .. }
            | SimEvent::Worker { run, .. }
            | SimEvent::AutoStop { run } => run,
        }
    }
}

/// Read-only view of the whole simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub time: SimTime,
    pub running: bool,
    pub run: u64,
    pub active_requests: Vec<Request>,
    pub workers: Vec<WorkerSnapshot>,
}

/// Drives every worker of a simulation on one virtual timeline.
pub struct Simulation<O: SimulationObserver = NoopObserver> {
    config: SimulationConfig,
    seed: u64,
    scheduler: Scheduler<SimEvent>,
    workers: Vec<WorkerProcess>,
    registry: RequestRegistry,
    ids: RequestIdAllocator,
    rng: StdRng,
    observer: O,
    metrics: MetricsCollector,
    running: bool,
    run: u64,
    drained_at: Option<SimTime>,
}

impl Simulation<NoopObserver> {
    /// Simulation without an observer
    pub fn with_config(config: SimulationConfig) -> Self {
        Self::new(config, NoopObserver)
    }
}

impl<O: SimulationObserver> Simulation<O> {
    pub fn new(config: SimulationConfig, observer: O) -> Self {
        let config = config.clamped();
        let seed = config.seed.unwrap_or_else(rand::random);
        let workers = build_workers(&config, seed);

        tracing::info!(
            workers = config.num_workers,
            thread_pool_size = config.thread_pool_size,
            speed = config.simulation_speed.get(),
            seed,
            "Simulation created"
        );

        Self {
            config,
            seed,
            scheduler: Scheduler::new(),
            workers,
            registry: RequestRegistry::new(),
            ids: RequestIdAllocator::new(),
            rng: StdRng::seed_from_u64(seed),
            observer,
            metrics: MetricsCollector::new(),
            running: false,
            run: 0,
            drained_at: None,
        }
    }

    /// Begin a new run: fresh timeline, empty registry, id counter back to zero.
    ///
    /// The initial batch is created `batch_delay_ms` later, async requests first.
    pub fn start(&mut self) -> Result<(), SimError> {
        if self.running {
            return Err(SimError::AlreadyRunning);
        }

        self.run += 1;
        self.scheduler = Scheduler::new();
        self.registry.clear();
        self.ids.reset();
        self.metrics.reset(self.scheduler.now());
        self.drained_at = None;

        let run = self.run;
        for worker in self.workers.iter_mut() {
            worker.reset();
            let index = worker.id();
            let mut timeline = MapTimeline::new(&mut self.scheduler, move |event: WorkerEvent| {
                SimEvent::Worker { run, worker: index, event }
            });
            worker.start(&mut timeline);
        }

        if self.config.batch_size() > 0 {
            self.scheduler.schedule_after(
                Duration::from_millis(self.config.batch_delay_ms),
                SimEvent::SeedBatch { run },
            );
        }

        self.running = true;
        tracing::info!(
            run,
            async_requests = self.config.async_requests,
            sync_requests = self.config.sync_requests,
            "Simulation started"
        );
        Ok(())
    }

    /// End the run: cancel every timer, empty every worker and the registry.
    pub fn stop(&mut self) -> Result<(), SimError> {
        if !self.running {
            return Err(SimError::NotRunning);
        }
        self.halt(StopReason::Requested);
        Ok(())
    }

    fn halt(&mut self, reason: StopReason) {
        let cancelled = self.scheduler.cancel_all();
        for worker in self.workers.iter_mut() {
            worker.reset();
        }
        let abandoned = self.registry.len();
        self.registry.clear();
        self.running = false;

        let now = self.scheduler.now();
        tracing::info!(run = self.run, ?reason, cancelled, abandoned, %now, "Simulation stopped");
        self.observer.on_stopped(reason, now);
    }

    /// Replace the configuration. Only allowed while stopped.
    pub fn reconfigure(&mut self, config: SimulationConfig) -> Result<(), SimError> {
        if self.running {
            return Err(SimError::ReconfigureWhileRunning);
        }

        let config = config.clamped();
        if config.changes_workers(&self.config) {
            if let Some(seed) = config.seed {
                self.seed = seed;
                self.rng = StdRng::seed_from_u64(seed);
            }
            self.workers = build_workers(&config, self.seed);
        } else if config.thread_pool_size != self.config.thread_pool_size {
            for worker in self.workers.iter_mut() {
                worker.resize_thread_pool(config.thread_pool_size);
            }
        }

        tracing::info!(?config, "Simulation reconfigured");
        self.config = config;
        Ok(())
    }

    /// Add one request of `kind` to the running simulation, on a random worker.
    ///
    /// Returns `None` when the simulation is stopped.
    pub fn add_request(&mut self, kind: RequestType) -> Option<RequestId> {
        if !self.running {
            tracing::debug!(%kind, "Ignoring request added while stopped");
            return None;
        }
        let worker = self.rng.gen_range(0..self.workers.len());
        let request = Request::new(self.ids.allocate(), kind, worker, self.scheduler.now());
        match self.admit(request) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to add request");
                None
            }
        }
    }

    /// Register a request built by the caller. It is routed on the next step.
    pub fn submit_request(&mut self, request: Request) -> Result<RequestId, SimError> {
        if !self.running {
            return Err(SimError::NotRunning);
        }
        self.admit(request)
    }

    fn admit(&mut self, request: Request) -> Result<RequestId, SimError> {
        let Some(worker) = self.workers.get(request.worker_id) else {
            return Err(SimError::UnknownWorker {
                worker: request.worker_id,
                workers: self.workers.len(),
            });
        };
        if !request.is_queued() {
            return Err(SimError::NotQueued { id: request.id, phase: request.phase });
        }
        if worker.is_known(request.id, request.kind) {
            return Err(SimError::AlreadyHandled { id: request.id, worker: request.worker_id });
        }

        let id = request.id;
        let kind = request.kind;
        let now = self.scheduler.now();
        self.registry.insert(request.clone())?;
        self.observer.on_submitted(&request, now);
        self.ids.observe(id);
        self.metrics.record_submitted(kind);
        self.scheduler.schedule_after(Duration::ZERO, SimEvent::Route { run: self.run, id });

        tracing::debug!(request_id = id, %kind, "Request registered");
        Ok(id)
    }

    /// Fire the next scheduled event. Returns its time, or `None` when stopped.
    pub fn step(&mut self) -> Option<SimTime> {
        if !self.running {
            return None;
        }
        let entry = self.scheduler.pop_next()?;
        self.dispatch(entry.event);
        Some(entry.fire_at)
    }

    /// Fire everything scheduled up to and including `target`, then move the clock there.
    ///
    /// Returns the number of events fired.
    pub fn advance_to(&mut self, target: SimTime) -> Result<usize, SimError> {
        let mut fired = 0;
        while self.running {
            let Some(entry) = self.scheduler.pop_due(target) else {
                break;
            };
            self.dispatch(entry.event);
            fired += 1;
        }
        self.scheduler.advance_to(target)?;
        Ok(fired)
    }

    pub fn advance_by(&mut self, delta: Duration) -> Result<usize, SimError> {
        let target = self.scheduler.now() + delta;
        self.advance_to(target)
    }

    /// Step until the run stops or the next event lies beyond `limit`.
    ///
    /// Returns whether the run has stopped.
    pub fn run_until_stopped(&mut self, limit: SimTime) -> bool {
        while self.running {
            let Some(entry) = self.scheduler.pop_due(limit) else {
                break;
            };
            self.dispatch(entry.event);
        }
        !self.running
    }

    fn dispatch(&mut self, event: SimEvent) {
        if event.run() != self.run {
            tracing::warn!(?event, run = self.run, "Discarding event from an earlier run");
            return;
        }

        match event {
            SimEvent::SeedBatch { .. } => self.seed_batch(),
            SimEvent::Route { id, .. } => self.route(id),
            SimEvent::Worker { worker, event, .. } => self.handle_worker(worker, event),
            SimEvent::AutoStop { .. } => self.check_drained(),
        }
        self.metrics.observe(self.occupancy());
    }

    fn seed_batch(&mut self) {
        let now = self.scheduler.now();
        let kinds = std::iter::repeat(RequestType::Async)
            .take(self.config.async_requests)
            .chain(std::iter::repeat(RequestType::Sync).take(self.config.sync_requests));

        for kind in kinds {
            let worker = self.rng.gen_range(0..self.workers.len());
            let request = Request::new(self.ids.allocate(), kind, worker, now);
            if let Err(e) = self.admit(request) {
                tracing::warn!(error = %e, "Failed to add batch request");
            }
        }
        tracing::info!(requests = self.config.batch_size(), %now, "Initial batch created");
    }

    fn route(&mut self, id: RequestId) {
        let now = self.scheduler.now();
        let Some(request) = self.registry.get(id) else {
            return;
        };
        let Some(worker) = self.workers.get_mut(request.worker_id) else {
            return;
        };
        let Some(phase) = worker.route(request, now) else {
            tracing::warn!(request_id = id, "Worker refused request, dropping it from the registry");
            self.registry.remove(id);
            self.note_if_drained(now);
            return;
        };

        let status = RequestStatus::Processing;
        if let Err(e) = self.registry.set_phase(id, phase, status) {
            tracing::warn!(error = %e, "Failed to record routed phase");
            return;
        }
        self.observer.on_phase_change(id, phase, status, now);
    }

    fn handle_worker(&mut self, index: WorkerId, event: WorkerEvent) {
        let run = self.run;
        let Some(worker) = self.workers.get_mut(index) else {
            return;
        };
        let mut timeline = MapTimeline::new(&mut self.scheduler, move |event: WorkerEvent| {
            SimEvent::Worker { run, worker: index, event }
        });
        let notices = worker.handle(event, &mut timeline);

        debug_assert!(worker.event_loop().executing_count() <= 1);
        debug_assert!(worker.thread_pool().busy_count() <= worker.thread_pool().size());

        for notice in notices {
            self.apply_notice(index, notice);
        }
    }

    fn apply_notice(&mut self, worker: WorkerId, notice: WorkerNotice) {
        let now = self.scheduler.now();
        match notice {
            WorkerNotice::TaskProgress { id, db_phase, slot, .. } => {
                self.observer.on_task_progress(worker, id, db_phase, slot, now);
            }
            WorkerNotice::ExternalCallChanged { id, action, entry } => {
                self.observer.on_external_call_change(id, action, entry.as_ref(), now);
            }
            WorkerNotice::Completed { id, kind } => self.complete(id, kind, now),
        }
    }

    fn complete(&mut self, id: RequestId, kind: RequestType, now: SimTime) {
        let Some(request) = self.registry.remove(id) else {
            tracing::warn!(request_id = id, "Completion for unknown request");
            return;
        };
        self.metrics.record_completed(kind, now.saturating_since(request.start_time));
        self.observer.on_complete(id, kind, now);
        tracing::debug!(request_id = id, %kind, %now, "Request completed");
        self.note_if_drained(now);
    }

    /// Arm the auto-stop check once the registry has emptied
    fn note_if_drained(&mut self, now: SimTime) {
        if self.registry.is_empty() && self.config.auto_stop {
            self.drained_at = Some(now);
            self.scheduler.schedule_after(
                Duration::from_millis(self.config.auto_stop_grace_ms),
                SimEvent::AutoStop { run: self.run },
            );
        }
    }

    /// Stop if the registry has stayed empty for the whole grace period
    fn check_drained(&mut self) {
        let Some(drained_at) = self.drained_at else {
            return;
        };
        let grace = Duration::from_millis(self.config.auto_stop_grace_ms);
        if self.registry.is_empty() && self.scheduler.now().saturating_since(drained_at) >= grace {
            self.halt(StopReason::Drained);
        }
    }

    fn occupancy(&self) -> Occupancy {
        self.workers.iter().fold(Occupancy::default(), |acc, worker| Occupancy {
            busy_threads: acc.busy_threads + worker.thread_pool().busy_count(),
            event_loop_queue: acc.event_loop_queue.max(worker.event_loop().queue_len()),
            thread_pool_queue: acc.thread_pool_queue.max(worker.thread_pool().queue_len()),
            external_calls: acc.external_calls + worker.external_calls().len(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Seed actually in use, drawn at random if none was configured
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    /// Time of the next scheduled event
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.scheduler.peek_time()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Id of the current (or last) run, starting at 1
    pub fn run_id(&self) -> u64 {
        self.run
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn workers(&self) -> &[WorkerProcess] {
        &self.workers
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    pub fn metrics(&self) -> SimulationMetrics {
        self.metrics.get_metrics(self.scheduler.now())
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            time: self.scheduler.now(),
            running: self.running,
            run: self.run,
            active_requests: self.registry.iter().cloned().collect(),
            workers: self.workers.iter().map(WorkerProcess::snapshot).collect(),
        }
    }
}

fn build_workers(config: &SimulationConfig, seed: u64) -> Vec<WorkerProcess> {
    (0..config.num_workers)
        .map(|index| WorkerProcess::new(index, config.worker_config(seed, index)))
        .collect()
}
