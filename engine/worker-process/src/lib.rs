// WorkerProcess - one independent replica of the whole request pipeline

mod snapshot;
mod types;
mod worker;

pub use snapshot::{ThreadView, WorkerSnapshot};
pub use types::{WorkerConfig, WorkerEvent, WorkerNotice};
pub use worker::WorkerProcess;
