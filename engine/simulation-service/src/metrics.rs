//! Metrics collection for a simulation run

use std::time::Duration;

use request_registry::RequestType;
use serde::{Deserialize, Serialize};
use simulation_clock::SimTime;

/// End-to-end latency statistics for one request type, in virtual milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencySummary {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        Self {
            count: sorted.len() as u64,
            avg_ms: sorted.iter().sum::<u64>() / sorted.len() as u64,
            max_ms: sorted[sorted.len() - 1],
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
        }
    }
}

fn percentile(sorted: &[u64], quantile: f64) -> u64 {
    let index = (sorted.len() as f64 * quantile) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Metrics of the current (or last) run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    /// Virtual time the run has covered
    pub elapsed_ms: u64,

    pub submitted_async: u64,
    pub submitted_sync: u64,
    pub completed_async: u64,
    pub completed_sync: u64,

    /// Submission to completion, async requests
    pub async_latency: LatencySummary,

    /// Submission to completion, sync requests
    pub sync_latency: LatencySummary,

    /// Most threads busy at once, summed over workers
    pub peak_busy_threads: usize,

    /// Longest event loop queue seen on any single worker
    pub peak_event_loop_queue: usize,

    /// Longest thread pool queue seen on any single worker
    pub peak_thread_pool_queue: usize,

    /// Most external calls in flight at once, summed over workers
    pub peak_external_calls: usize,

    /// Completed requests per virtual second
    pub throughput_per_sec: f64,
}

/// Occupancy of all workers at one instant
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Occupancy {
    pub busy_threads: usize,
    pub event_loop_queue: usize,
    pub thread_pool_queue: usize,
    pub external_calls: usize,
}

/// Metrics collector for a simulation run
#[derive(Debug, Default)]
pub struct MetricsCollector {
    started_at: SimTime,
    submitted_async: u64,
    submitted_sync: u64,
    async_latencies: Vec<u64>,
    sync_latencies: Vec<u64>,
    peak: Occupancy,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request entering the run
    pub fn record_submitted(&mut self, kind: RequestType) {
        match kind {
            RequestType::Async => self.submitted_async += 1,
            RequestType::Sync => self.submitted_sync += 1,
        }
    }

    /// Record a completed request and how long it took end to end
    pub fn record_completed(&mut self, kind: RequestType, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        match kind {
            RequestType::Async => self.async_latencies.push(latency_ms),
            RequestType::Sync => self.sync_latencies.push(latency_ms),
        }
    }

    pub(crate) fn observe(&mut self, now: Occupancy) {
        self.peak.busy_threads = self.peak.busy_threads.max(now.busy_threads);
        self.peak.event_loop_queue = self.peak.event_loop_queue.max(now.event_loop_queue);
        self.peak.thread_pool_queue = self.peak.thread_pool_queue.max(now.thread_pool_queue);
        self.peak.external_calls = self.peak.external_calls.max(now.external_calls);
    }

    pub fn completed(&self) -> u64 {
        (self.async_latencies.len() + self.sync_latencies.len()) as u64
    }

    /// Get current metrics
    pub fn get_metrics(&self, now: SimTime) -> SimulationMetrics {
        let elapsed = now.saturating_since(self.started_at);
        let elapsed_ms = elapsed.as_millis() as u64;

        let throughput_per_sec = if elapsed_ms > 0 {
            self.completed() as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        SimulationMetrics {
            elapsed_ms,
            submitted_async: self.submitted_async,
            submitted_sync: self.submitted_sync,
            completed_async: self.async_latencies.len() as u64,
            completed_sync: self.sync_latencies.len() as u64,
            async_latency: LatencySummary::from_samples(&self.async_latencies),
            sync_latency: LatencySummary::from_samples(&self.sync_latencies),
            peak_busy_threads: self.peak.busy_threads,
            peak_event_loop_queue: self.peak.event_loop_queue,
            peak_thread_pool_queue: self.peak.thread_pool_queue,
            peak_external_calls: self.peak.external_calls,
            throughput_per_sec,
        }
    }

    /// Reset all metrics for a run starting at `started_at`
    pub fn reset(&mut self, started_at: SimTime) {
        *self = Self { started_at, ..Self::default() };
    }
}
