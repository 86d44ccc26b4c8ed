// RequestRegistry - request data model and the canonical list of in-flight requests

mod events;
mod id_allocator;
mod ledger;
mod registry;
mod types;

pub use events::{CallAction, EngineEvent};
pub use id_allocator::RequestIdAllocator;
pub use ledger::{TaskLedger, TaskState};
pub use registry::{RegistryError, RequestRegistry};
pub use types::{DbPhase, Phase, Request, RequestId, RequestStatus, RequestType, WorkerId};
