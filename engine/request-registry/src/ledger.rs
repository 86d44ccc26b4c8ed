// Per-engine task tracking

use crate::types::RequestId;
use std::collections::HashMap;

/// Where an engine currently holds a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting in the engine's FIFO queue
    Queued,
    /// Occupying an execution slot
    Assigned,
    /// Suspended in the external call stage, slot released
    AwaitingExternal,
    /// Finished; the id is never admitted again
    Completed,
}

/// Single authoritative record of every task id an engine has seen.
///
/// Admission consults this one map instead of cross-checking the queue, the slots and an
/// in-flight marker set, so a redelivered request can never be scheduled twice.
#[derive(Debug, Default)]
pub struct TaskLedger {
    states: HashMap<RequestId, TaskState>,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self { states: HashMap::new() }
    }

    /// Record a new task as queued. Returns `false` if the id is already known in any state.
    pub fn admit(&mut self, id: RequestId) -> bool {
        if self.states.contains_key(&id) {
            return false;
        }
        self.states.insert(id, TaskState::Queued);
        true
    }

    /// Move a known task to `state`. Returns the previous state, `None` if unknown.
    pub fn transition(&mut self, id: RequestId, state: TaskState) -> Option<TaskState> {
        let slot = self.states.get_mut(&id)?;
        let previous = *slot;
        *slot = state;
        Some(previous)
    }

    pub fn state(&self, id: RequestId) -> Option<TaskState> {
        self.states.get(&id).copied()
    }

    pub fn is_known(&self, id: RequestId) -> bool {
        self.states.contains_key(&id)
    }

    /// Number of tasks currently in `state`
    pub fn count(&self, state: TaskState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    /// Tasks admitted but not yet completed
    pub fn in_flight(&self) -> usize {
        self.states.values().filter(|s| **s != TaskState::Completed).count()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
