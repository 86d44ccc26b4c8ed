use request_registry::{DbPhase, RequestId};
use serde::{Deserialize, Serialize};
use simulation_clock::SimTime;

/// Engine-private wrapper around an async request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopTask {
    pub id: RequestId,
    /// True until the task has been through the external call once
    pub is_new_task: bool,
    pub db_phase: DbPhase,
    pub queued_at: SimTime,
    /// When the task came back from the external call
    pub returned_at: Option<SimTime>,
}

impl EventLoopTask {
    /// A brand-new task, queued at `now`
    pub fn new(id: RequestId, now: SimTime) -> Self {
        Self { id, is_new_task: true, db_phase: DbPhase::PreAwait, queued_at: now, returned_at: None }
    }

    /// A task re-entering the queue after its external call
    pub fn resumed(id: RequestId, now: SimTime) -> Self {
        Self {
            id,
            is_new_task: false,
            db_phase: DbPhase::PostAwait,
            queued_at: now,
            returned_at: Some(now),
        }
    }
}

/// What an event loop timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLoopTimerKind {
    /// Task reached its await point; leave the slot and enter the external call
    Suspend,
    /// External call finished; re-queue as a resumed task
    ExternalCallReturn,
    /// Post-await execution finished
    Complete,
}

/// Timer armed by the event loop. Carries the engine epoch it was armed in so that timers
/// from before a reset are recognized and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventLoopTimer {
    pub epoch: u64,
    pub id: RequestId,
    pub kind: EventLoopTimerKind,
}
