// ExternalCallStage - in-flight DB operations of one worker

mod stage;

pub use stage::{ConnectionPoolView, ExternalCallEntry, ExternalCallStage};
