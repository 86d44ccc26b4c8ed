// Request ID allocation, owned by the simulation run

use crate::types::RequestId;

/// Monotonic request id counter.
///
/// Owned by the run context and reset at the start of every run, so ids restart at 1 and are
/// never reused within a run.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    last: RequestId,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Allocate the next id
    pub fn allocate(&mut self) -> RequestId {
        self.last += 1;
        self.last
    }

    /// Last id handed out, 0 if none yet
    pub fn current(&self) -> RequestId {
        self.last
    }

    /// Keep the counter ahead of an id that was assigned elsewhere
    pub fn observe(&mut self, id: RequestId) {
        self.last = self.last.max(id);
    }

    /// Start over for a new run
    pub fn reset(&mut self) {
        self.last = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_allocation() {
        let mut allocator = RequestIdAllocator::new();
        assert_eq!(allocator.allocate(), 1);
        assert_eq!(allocator.allocate(), 2);
        assert_eq!(allocator.allocate(), 3);
        assert_eq!(allocator.current(), 3);
    }

    #[test]
    fn test_reset_restarts_at_one() {
        let mut allocator = RequestIdAllocator::new();
        allocator.allocate();
        allocator.allocate();
        allocator.reset();
        assert_eq!(allocator.current(), 0);
        assert_eq!(allocator.allocate(), 1);
    }

    #[test]
    fn test_observe_skips_external_ids() {
        let mut allocator = RequestIdAllocator::new();
        allocator.observe(10);
        assert_eq!(allocator.allocate(), 11);
        allocator.observe(4);
        assert_eq!(allocator.allocate(), 12);
    }
}
