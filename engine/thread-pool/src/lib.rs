// ThreadPool - bounded pool of execution slots for blocking requests

mod pool;
mod slot;

pub use pool::{ThreadPoolEngine, ThreadPoolStats};
pub use slot::{PoolTask, ThreadPoolTimer, ThreadPoolTimerKind, ThreadSlot};

/// Smallest pool a worker can be configured with
pub const MIN_POOL_SIZE: usize = 1;

/// Largest pool a worker can be configured with
pub const MAX_POOL_SIZE: usize = 16;
