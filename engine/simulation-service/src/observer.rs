//! Callbacks from the simulation to whatever presents it

use external_call_stage::ExternalCallEntry;
use request_registry::{
    CallAction, DbPhase, Phase, Request, RequestId, RequestStatus, RequestType, WorkerId,
};
use serde::{Deserialize, Serialize};
use simulation_clock::SimTime;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` was called
    Requested,
    /// Every request completed and nothing new arrived during the grace period
    Drained,
}

/// Receives every externally visible change of a running simulation.
///
/// All methods default to doing nothing.
pub trait SimulationObserver {
    /// A request was registered for the current run
    fn on_submitted(&mut self, _request: &Request, _at: SimTime) {}

    /// A request's coarse phase changed (queued to event-loop or thread-pool)
    fn on_phase_change(&mut self, _id: RequestId, _phase: Phase, _status: RequestStatus, _at: SimTime) {}

    /// An engine moved a task into a new db-phase
    fn on_task_progress(
        &mut self,
        _worker: WorkerId,
        _id: RequestId,
        _db_phase: DbPhase,
        _slot: Option<usize>,
        _at: SimTime,
    ) {
    }

    /// The external call stage gained or lost an entry
    fn on_external_call_change(
        &mut self,
        _id: RequestId,
        _action: CallAction,
        _entry: Option<&ExternalCallEntry>,
        _at: SimTime,
    ) {
    }

    /// A request finished. Called exactly once per request of a run that is not stopped early.
    fn on_complete(&mut self, _id: RequestId, _kind: RequestType, _at: SimTime) {}

    fn on_stopped(&mut self, _reason: StopReason, _at: SimTime) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SimulationObserver for NoopObserver {}

/// One observed callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObservedEvent {
    Submitted { at: SimTime, id: RequestId, kind: RequestType, worker: WorkerId },
    PhaseChange { at: SimTime, id: RequestId, phase: Phase, status: RequestStatus },
    TaskProgress { at: SimTime, worker: WorkerId, id: RequestId, db_phase: DbPhase, slot: Option<usize> },
    ExternalCall { at: SimTime, id: RequestId, action: CallAction },
    Completed { at: SimTime, id: RequestId, kind: RequestType },
    Stopped { at: SimTime, reason: StopReason },
}

impl ObservedEvent {
    pub fn at(&self) -> SimTime {
        match self {
            ObservedEvent::Submitted { at, .. }
            | ObservedEvent::PhaseChange { at, .. }
            | ObservedEvent::TaskProgress { at, .. }
            | ObservedEvent::ExternalCall { at, .. }
            | ObservedEvent::Completed { at, .. }
            | ObservedEvent::Stopped { at, .. } => *at,
        }
    }

    /// Request the event is about, if any
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ObservedEvent::Submitted { id, .. }
            | ObservedEvent::PhaseChange { id, .. }
            | ObservedEvent::TaskProgress { id, .. }
            | ObservedEvent::ExternalCall { id, .. }
            | ObservedEvent::Completed { id, .. } => Some(*id),
            ObservedEvent::Stopped { .. } => None,
        }
    }
}

/// Observer that keeps an ordered log of everything it was told
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Vec<ObservedEvent>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ObservedEvent] {
        &self.events
    }

    /// Drain the log
    pub fn take(&mut self) -> Vec<ObservedEvent> {
        std::mem::take(&mut self.events)
    }

    /// Completed request ids in completion order
    pub fn completions(&self) -> Vec<RequestId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ObservedEvent::Completed { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Every event about one request, in order
    pub fn history(&self, id: RequestId) -> Vec<&ObservedEvent> {
        self.events.iter().filter(|event| event.request_id() == Some(id)).collect()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.events.iter().rev().find_map(|event| match event {
            ObservedEvent::Stopped { reason, .. } => Some(*reason),
            _ => None,
        })
    }
}

impl SimulationObserver for RecordingObserver {
    fn on_submitted(&mut self, request: &Request, at: SimTime) {
        self.events.push(ObservedEvent::Submitted {
            at,
            id: request.id,
            kind: request.kind,
            worker: request.worker_id,
        });
    }

    fn on_phase_change(&mut self, id: RequestId, phase: Phase, status: RequestStatus, at: SimTime) {
        self.events.push(ObservedEvent::PhaseChange { at, id, phase, status });
    }

    fn on_task_progress(
        &mut self,
        worker: WorkerId,
        id: RequestId,
        db_phase: DbPhase,
        slot: Option<usize>,
        at: SimTime,
    ) {
        self.events.push(ObservedEvent::TaskProgress { at, worker, id, db_phase, slot });
    }

    fn on_external_call_change(
        &mut self,
        id: RequestId,
        action: CallAction,
        _entry: Option<&ExternalCallEntry>,
        at: SimTime,
    ) {
        self.events.push(ObservedEvent::ExternalCall { at, id, action });
    }

    fn on_complete(&mut self, id: RequestId, kind: RequestType, at: SimTime) {
        self.events.push(ObservedEvent::Completed { at, id, kind });
    }

    fn on_stopped(&mut self, reason: StopReason, at: SimTime) {
        self.events.push(ObservedEvent::Stopped { at, reason });
    }
}

impl<O: SimulationObserver + ?Sized> SimulationObserver for &mut O {
    fn on_submitted(&mut self, request: &Request, at: SimTime) {
        (**self).on_submitted(request, at)
    }

    fn on_phase_change(&mut self, id: RequestId, phase: Phase, status: RequestStatus, at: SimTime) {
        (**self).on_phase_change(id, phase, status, at)
    }

    fn on_task_progress(
        &mut self,
        worker: WorkerId,
        id: RequestId,
        db_phase: DbPhase,
        slot: Option<usize>,
        at: SimTime,
    ) {
        (**self).on_task_progress(worker, id, db_phase, slot, at)
    }

    fn on_external_call_change(
        &mut self,
        id: RequestId,
        action: CallAction,
        entry: Option<&ExternalCallEntry>,
        at: SimTime,
    ) {
        (**self).on_external_call_change(id, action, entry, at)
    }

    fn on_complete(&mut self, id: RequestId, kind: RequestType, at: SimTime) {
        (**self).on_complete(id, kind, at)
    }

    fn on_stopped(&mut self, reason: StopReason, at: SimTime) {
        (**self).on_stopped(reason, at)
    }
}
