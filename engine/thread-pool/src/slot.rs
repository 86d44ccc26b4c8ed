use request_registry::{DbPhase, RequestId};
use serde::{Deserialize, Serialize};
use simulation_clock::SimTime;

/// Engine-private wrapper around a sync request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTask {
    pub id: RequestId,
    pub db_phase: DbPhase,
    pub queued_at: SimTime,
    pub assigned_at: Option<SimTime>,
}

impl PoolTask {
    pub fn new(id: RequestId, now: SimTime) -> Self {
        Self { id, db_phase: DbPhase::PreAwait, queued_at: now, assigned_at: None }
    }
}

/// One thread of the pool. Slots live as long as the pool; only occupancy changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSlot {
    pub id: usize,
    busy: bool,
    current_task: Option<PoolTask>,
}

impl ThreadSlot {
    pub fn new(id: usize) -> Self {
        Self { id, busy: false, current_task: None }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn current_task(&self) -> Option<&PoolTask> {
        self.current_task.as_ref()
    }

    pub(crate) fn current_task_mut(&mut self) -> Option<&mut PoolTask> {
        self.current_task.as_mut()
    }

    pub(crate) fn occupy(&mut self, task: PoolTask) {
        debug_assert!(!self.busy, "thread {} assigned while busy", self.id);
        self.busy = true;
        self.current_task = Some(task);
    }

    pub(crate) fn release(&mut self) -> Option<PoolTask> {
        self.busy = false;
        self.current_task.take()
    }

    pub(crate) fn holds(&self, id: RequestId) -> bool {
        self.current_task.as_ref().is_some_and(|task| task.id == id)
    }
}

/// What a thread pool timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadPoolTimerKind {
    /// The thread reached the blocking call
    BlockingCallStart,
    /// The blocking call returned; the thread is released
    BlockingCallEnd,
}

/// Timer armed by the pool, tagged with the pool epoch and the slot it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadPoolTimer {
    pub epoch: u64,
    pub slot: usize,
    pub id: RequestId,
    pub kind: ThreadPoolTimerKind,
}
