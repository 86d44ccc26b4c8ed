use crate::types::{DbPhase, RequestId, RequestType};
use serde::{Deserialize, Serialize};

/// Membership change in the external call stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallAction {
    Add,
    Remove,
}

/// What an engine reports to its worker after a tick or timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A task entered an execution slot (`slot` is the thread index for the pool)
    TaskStarted { id: RequestId, kind: RequestType, db_phase: DbPhase, slot: Option<usize> },
    /// A task entered or left the external call
    ExternalCall { id: RequestId, kind: RequestType, action: CallAction },
    /// A task is fully finished
    Completed { id: RequestId, kind: RequestType },
}

impl EngineEvent {
    pub fn id(&self) -> RequestId {
        match self {
            EngineEvent::TaskStarted { id, .. }
            | EngineEvent::ExternalCall { id, .. }
            | EngineEvent::Completed { id, .. } => *id,
        }
    }
}
