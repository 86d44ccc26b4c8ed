use request_registry::{RequestId, RequestType, WorkerId};
use serde::{Deserialize, Serialize};
use simulation_clock::SimTime;

/// One in-flight external call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCallEntry {
    pub id: RequestId,
    /// Originating request type, display only
    #[serde(rename = "type")]
    pub kind: RequestType,
    pub worker_id: WorkerId,
    pub started_at: SimTime,
}

/// Connection-pool style reading of the stage against its nominal capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPoolView {
    pub size: usize,
    pub active: usize,
    pub idle: usize,
    pub exhausted: bool,
}

/// Latency-only stage holding every external call currently in flight.
///
/// Concurrency is unlimited: `add` never rejects. The optional capacity is observational
/// only; exceeding it is reported through [`ExternalCallStage::is_saturated`] and
/// [`ExternalCallStage::overflow`] but never delays or refuses a call.
#[derive(Debug, Default)]
pub struct ExternalCallStage {
    entries: Vec<ExternalCallEntry>,
    capacity: Option<usize>,
    peak: usize,
    total_calls: u64,
}

impl ExternalCallStage {
    /// Unbounded stage
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Stage with an optional nominal capacity
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self { entries: Vec::new(), capacity, peak: 0, total_calls: 0 }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Insert an entry. Returns `false` if the id is already in the stage.
    pub fn add(&mut self, entry: ExternalCallEntry) -> bool {
        if self.contains(entry.id) {
            tracing::warn!(request_id = entry.id, "Ignoring duplicate external call add");
            return false;
        }
        self.entries.push(entry);
        self.total_calls += 1;
        self.peak = self.peak.max(self.entries.len());

        if let Some(capacity) = self.capacity {
            if self.entries.len() > capacity {
                tracing::debug!(
                    active = self.entries.len(),
                    capacity,
                    "External calls exceed nominal pool capacity"
                );
            }
        }
        true
    }

    /// Remove the entry for `id`, if present
    pub fn remove(&mut self, id: RequestId) -> Option<ExternalCallEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn get(&self, id: RequestId) -> Option<&ExternalCallEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// In-flight calls in the order they started
    pub fn entries(&self) -> &[ExternalCallEntry] {
        &self.entries
    }

    pub fn count_by_type(&self, kind: RequestType) -> usize {
        self.entries.iter().filter(|entry| entry.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest number of simultaneous calls seen this run
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Calls added this run
    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    /// Whether every nominal connection is in use
    pub fn is_saturated(&self) -> bool {
        self.capacity.is_some_and(|capacity| self.entries.len() >= capacity)
    }

    /// Calls in flight beyond the nominal capacity
    pub fn overflow(&self) -> usize {
        self.capacity.map_or(0, |capacity| self.entries.len().saturating_sub(capacity))
    }

    /// Connection pool reading, `None` for an unbounded stage
    pub fn connection_view(&self) -> Option<ConnectionPoolView> {
        let size = self.capacity?;
        let active = self.entries.len().min(size);
        Some(ConnectionPoolView { size, active, idle: size - active, exhausted: self.is_saturated() })
    }

    /// Drop every entry and the run counters without notifying anyone (simulation stop)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.peak = 0;
        self.total_calls = 0;
    }
}
