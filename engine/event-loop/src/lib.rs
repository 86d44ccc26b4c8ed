//! # EventLoop
//!
//! Cooperative, single-threaded scheduling of async requests. Exactly one task occupies the
//! execution slot at a time; a task gives the slot up only when it suspends into the external
//! call stage or completes. New and resumed tasks share one FIFO queue.

mod engine;
mod task;

pub use engine::{EventLoopEngine, EventLoopStats};
pub use task::{EventLoopTask, EventLoopTimer, EventLoopTimerKind};
