use std::collections::VecDeque;

use request_registry::{
    CallAction, DbPhase, EngineEvent, Request, RequestId, RequestType, TaskLedger, TaskState,
};
use serde::{Deserialize, Serialize};
use simulation_clock::{DurationSampler, SimTime, ThreadPoolLatency, Timeline};

use crate::slot::{PoolTask, ThreadPoolTimer, ThreadPoolTimerKind, ThreadSlot};
use crate::MIN_POOL_SIZE;

/// Running totals for one thread pool, cleared on reset and resize
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPoolStats {
    pub admitted: u64,
    pub duplicates_ignored: u64,
    pub assigned: u64,
    pub completed: u64,
    pub stale_timers: u64,
    pub peak_busy: usize,
}

/// The thread pool engine of one worker.
///
/// Each assigned task holds its thread for the whole blocking external call, so once every
/// thread is busy further sync requests wait in the queue even though the calls themselves
/// only wait.
#[derive(Debug)]
pub struct ThreadPoolEngine {
    slots: Vec<ThreadSlot>,
    queue: VecDeque<PoolTask>,
    ledger: TaskLedger,
    latency: ThreadPoolLatency,
    sampler: DurationSampler,
    epoch: u64,
    stats: ThreadPoolStats,
}

impl ThreadPoolEngine {
    /// Create a pool of `size` threads (at least one)
    pub fn new(size: usize, latency: ThreadPoolLatency, sampler: DurationSampler) -> Self {
        Self {
            slots: build_slots(size),
            queue: VecDeque::new(),
            ledger: TaskLedger::new(),
            latency,
            sampler,
            epoch: 0,
            stats: ThreadPoolStats::default(),
        }
    }

    /// Queue a sync request. Ignored if the id is already queued, assigned or completed, or if
    /// the request is not sync.
    pub fn submit(&mut self, request: &Request, now: SimTime) -> bool {
        if request.kind != RequestType::Sync {
            tracing::warn!(request_id = request.id, "Thread pool only accepts sync requests");
            return false;
        }
        if !self.ledger.admit(request.id) {
            self.stats.duplicates_ignored += 1;
            tracing::debug!(request_id = request.id, "Ignoring duplicate thread pool submission");
            return false;
        }
        self.queue.push_back(PoolTask::new(request.id, now));
        self.stats.admitted += 1;
        true
    }

    /// Hand queued tasks to free threads, scanning threads in index order.
    ///
    /// Returns how many tasks were assigned.
    pub fn tick<T>(&mut self, timeline: &mut T, out: &mut Vec<EngineEvent>) -> usize
    where
        T: Timeline<ThreadPoolTimer> + ?Sized,
    {
        let now = timeline.now();
        let mut assigned = 0;

        for slot in self.slots.iter_mut() {
            if self.queue.is_empty() {
                break;
            }
            if slot.is_busy() {
                continue;
            }
            let Some(mut task) = self.queue.pop_front() else { break };

            task.assigned_at = Some(now);
            task.db_phase = DbPhase::PreAwait;
            let id = task.id;
            self.ledger.transition(id, TaskState::Assigned);
            slot.occupy(task);

            let delay = self.sampler.sample(self.latency.pre_call);
            timeline.schedule_after(delay, ThreadPoolTimer {
                epoch: self.epoch,
                slot: slot.id,
                id,
                kind: ThreadPoolTimerKind::BlockingCallStart,
            });
            tracing::debug!(request_id = id, thread = slot.id, ?delay, "Thread assigned");
            out.push(EngineEvent::TaskStarted {
                id,
                kind: RequestType::Sync,
                db_phase: DbPhase::PreAwait,
                slot: Some(slot.id),
            });
            assigned += 1;
        }

        self.stats.assigned += assigned as u64;
        let busy = self.busy_count();
        debug_assert!(busy <= self.slots.len(), "busy threads exceed pool size");
        self.stats.peak_busy = self.stats.peak_busy.max(busy);
        assigned
    }

    /// Handle one of this pool's timers firing
    pub fn on_timer<T>(
        &mut self,
        timer: ThreadPoolTimer,
        timeline: &mut T,
        out: &mut Vec<EngineEvent>,
    ) where
        T: Timeline<ThreadPoolTimer> + ?Sized,
    {
        if timer.epoch != self.epoch {
            self.stats.stale_timers += 1;
            tracing::debug!(request_id = timer.id, "Dropping thread pool timer from a previous pool");
            return;
        }
        let Some(slot) = self.slots.get_mut(timer.slot).filter(|slot| slot.holds(timer.id)) else {
            tracing::warn!(
                request_id = timer.id,
                thread = timer.slot,
                "Timer fired for a task not held by its thread"
            );
            return;
        };

        match timer.kind {
            ThreadPoolTimerKind::BlockingCallStart => {
                if let Some(task) = slot.current_task_mut() {
                    task.db_phase = DbPhase::DbOperation;
                }
                out.push(EngineEvent::ExternalCall {
                    id: timer.id,
                    kind: RequestType::Sync,
                    action: CallAction::Add,
                });
                let delay = self.sampler.sample(self.latency.external_call);
                timeline.schedule_after(delay, ThreadPoolTimer {
                    kind: ThreadPoolTimerKind::BlockingCallEnd,
                    ..timer
                });
            }
            ThreadPoolTimerKind::BlockingCallEnd => {
                out.push(EngineEvent::ExternalCall {
                    id: timer.id,
                    kind: RequestType::Sync,
                    action: CallAction::Remove,
                });
                slot.release();
                self.ledger.transition(timer.id, TaskState::Completed);
                self.stats.completed += 1;
                tracing::debug!(request_id = timer.id, thread = timer.slot, "Thread released");
                out.push(EngineEvent::Completed { id: timer.id, kind: RequestType::Sync });
            }
        }
    }

    /// Rebuild the pool with a new size. All tasks are dropped and pending timers go stale.
    pub fn resize(&mut self, size: usize) {
        self.reset();
        self.slots = build_slots(size);
        tracing::info!(size = self.slots.len(), "Thread pool resized");
    }

    /// Clear all state unconditionally. Timers armed before the reset become no-ops.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.release();
        }
        self.queue.clear();
        self.ledger.clear();
        self.stats = ThreadPoolStats::default();
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[ThreadSlot] {
        &self.slots
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_busy()).count()
    }

    pub fn idle_count(&self) -> usize {
        self.size() - self.busy_count()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued tasks, head first
    pub fn queued(&self) -> impl Iterator<Item = &PoolTask> {
        self.queue.iter()
    }

    /// Thread currently holding `id`
    pub fn slot_of(&self, id: RequestId) -> Option<usize> {
        self.slots.iter().find(|slot| slot.holds(id)).map(|slot| slot.id)
    }

    pub fn task_state(&self, id: RequestId) -> Option<TaskState> {
        self.ledger.state(id)
    }

    /// Tasks admitted and not yet completed
    pub fn in_flight(&self) -> usize {
        self.ledger.in_flight()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn stats(&self) -> ThreadPoolStats {
        self.stats
    }
}

fn build_slots(size: usize) -> Vec<ThreadSlot> {
    (0..size.max(MIN_POOL_SIZE)).map(ThreadSlot::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use simulation_clock::{LatencyRange, Scheduler, SimulationSpeed};

    fn fixed_latency(pre: u64, external: u64) -> ThreadPoolLatency {
        ThreadPoolLatency {
            pre_call: LatencyRange::fixed(pre),
            external_call: LatencyRange::fixed(external),
        }
    }

    fn pool(size: usize, latency: ThreadPoolLatency) -> ThreadPoolEngine {
        ThreadPoolEngine::new(size, latency, DurationSampler::new(3, SimulationSpeed::new(10)))
    }

    fn sync_request(id: RequestId) -> Request {
        Request::new(id, RequestType::Sync, 0, SimTime::ZERO)
    }

    fn drain(
        pool: &mut ThreadPoolEngine,
        scheduler: &mut Scheduler<ThreadPoolTimer>,
        out: &mut Vec<EngineEvent>,
    ) {
        loop {
            pool.tick(scheduler, out);
            assert!(pool.busy_count() <= pool.size());
            match scheduler.pop_next() {
                Some(entry) => pool.on_timer(entry.event, scheduler, out),
                None => break,
            }
        }
    }

    fn completions(out: &[EngineEvent]) -> Vec<RequestId> {
        out.iter()
            .filter_map(|e| match e {
                EngineEvent::Completed { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_pool_size_is_at_least_one() {
        let pool = pool(0, ThreadPoolLatency::default());
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_fills_slots_in_index_order() {
        let mut pool = pool(3, fixed_latency(10, 10));
        let mut scheduler = Scheduler::new();
        let mut out = Vec::new();
        for id in 1..=5 {
            pool.submit(&sync_request(id), scheduler.now());
        }

        assert_eq!(pool.tick(&mut scheduler, &mut out), 3);
        assert_eq!(pool.slot_of(1), Some(0));
        assert_eq!(pool.slot_of(2), Some(1));
        assert_eq!(pool.slot_of(3), Some(2));
        assert_eq!(pool.queue_len(), 2);
        assert_eq!(pool.tick(&mut scheduler, &mut out), 0, "no free thread");
    }

    #[test]
    fn test_slot_held_through_external_call() {
        let mut pool = pool(1, fixed_latency(800, 1000));
        let mut scheduler = Scheduler::new();
        let mut out = Vec::new();
        pool.submit(&sync_request(1), scheduler.now());
        pool.submit(&sync_request(2), scheduler.now());
        pool.tick(&mut scheduler, &mut out);

        let start = scheduler.pop_next().unwrap();
        assert_eq!(start.fire_at, SimTime::from_millis(800));
        pool.on_timer(start.event, &mut scheduler, &mut out);
        assert!(matches!(out.last(), Some(EngineEvent::ExternalCall { action: CallAction::Add, .. })));
        assert_eq!(pool.slots()[0].current_task().map(|t| t.db_phase), Some(DbPhase::DbOperation));

        assert_eq!(pool.tick(&mut scheduler, &mut out), 0, "thread still blocked");
        assert_eq!(pool.busy_count(), 1);

        let end = scheduler.pop_next().unwrap();
        assert_eq!(end.fire_at, SimTime::from_millis(1800));
        pool.on_timer(end.event, &mut scheduler, &mut out);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.tick(&mut scheduler, &mut out), 1);
        assert_eq!(pool.slot_of(2), Some(0));
    }

    #[test]
    fn test_single_thread_completes_in_submission_order() {
        let mut pool = pool(1, fixed_latency(5, 7));
        let mut scheduler = Scheduler::new();
        let mut out = Vec::new();
        for id in [4, 2, 9] {
            pool.submit(&sync_request(id), scheduler.now());
        }
        drain(&mut pool, &mut scheduler, &mut out);
        assert_eq!(completions(&out), vec![4, 2, 9]);
        assert_eq!(pool.stats().peak_busy, 1);
    }

    #[test]
    fn test_duplicates_ignored() {
        let mut pool = pool(2, fixed_latency(5, 5));
        let mut scheduler = Scheduler::new();
        let mut out = Vec::new();
        let request = sync_request(1);

        assert!(pool.submit(&request, scheduler.now()));
        assert!(!pool.submit(&request, scheduler.now()));
        pool.tick(&mut scheduler, &mut out);
        assert!(!pool.submit(&request, scheduler.now()));
        drain(&mut pool, &mut scheduler, &mut out);
        assert!(!pool.submit(&request, scheduler.now()));

        assert_eq!(completions(&out), vec![1]);
        assert_eq!(pool.stats().assigned, 1);
    }

    #[test]
    fn test_async_requests_rejected() {
        let mut pool = pool(2, ThreadPoolLatency::default());
        let request = Request::new(1, RequestType::Async, 0, SimTime::ZERO);
        assert!(!pool.submit(&request, SimTime::ZERO));
    }

    #[test]
    fn test_resize_invalidates_timers() {
        let mut pool = pool(2, fixed_latency(5, 5));
        let mut scheduler = Scheduler::new();
        let mut out = Vec::new();
        pool.submit(&sync_request(1), scheduler.now());
        pool.submit(&sync_request(2), scheduler.now());
        pool.tick(&mut scheduler, &mut out);
        assert_eq!(pool.stats().peak_busy, 2);

        pool.resize(4);
        out.clear();
        assert_eq!(pool.stats(), ThreadPoolStats::default());
        while let Some(entry) = scheduler.pop_next() {
            pool.on_timer(entry.event, &mut scheduler, &mut out);
        }
        assert!(out.is_empty());
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.stats().stale_timers, 2);
    }

    proptest! {
        #[test]
        fn prop_busy_never_exceeds_size(
            size in 1usize..=16,
            burst in 1u64..60,
            seed in any::<u64>(),
        ) {
            let mut pool = ThreadPoolEngine::new(
                size,
                ThreadPoolLatency::default(),
                DurationSampler::new(seed, SimulationSpeed::new(10)),
            );
            let mut scheduler = Scheduler::new();
            let mut out = Vec::new();
            for id in 1..=burst {
                pool.submit(&sync_request(id), scheduler.now());
            }

            loop {
                pool.tick(&mut scheduler, &mut out);
                prop_assert!(pool.busy_count() <= size);
                match scheduler.pop_next() {
                    Some(entry) => pool.on_timer(entry.event, &mut scheduler, &mut out),
                    None => break,
                }
            }

            let done = completions(&out);
            prop_assert_eq!(done.len() as u64, burst);
            prop_assert!(pool.stats().peak_busy <= size);
            prop_assert_eq!(pool.stats().peak_busy, size.min(burst as usize));
        }
    }
}
