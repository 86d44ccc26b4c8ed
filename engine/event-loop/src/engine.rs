use std::collections::VecDeque;

use request_registry::{
    CallAction, DbPhase, EngineEvent, Request, RequestId, RequestType, TaskLedger, TaskState,
};
use serde::{Deserialize, Serialize};
use simulation_clock::{DurationSampler, EventLoopLatency, SimTime, Timeline};

use crate::task::{EventLoopTask, EventLoopTimer, EventLoopTimerKind};

/// Running totals for one event loop, cleared on reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopStats {
    pub admitted: u64,
    pub duplicates_ignored: u64,
    pub started: u64,
    pub resumed: u64,
    pub completed: u64,
    pub stale_timers: u64,
}

/// The event loop engine of one worker
#[derive(Debug)]
pub struct EventLoopEngine {
    latency: EventLoopLatency,
    sampler: DurationSampler,
    queue: VecDeque<EventLoopTask>,
    executing: Option<EventLoopTask>,
    ledger: TaskLedger,
    epoch: u64,
    stats: EventLoopStats,
}

impl EventLoopEngine {
    pub fn new(latency: EventLoopLatency, sampler: DurationSampler) -> Self {
        Self {
            latency,
            sampler,
            queue: VecDeque::new(),
            executing: None,
            ledger: TaskLedger::new(),
            epoch: 0,
            stats: EventLoopStats::default(),
        }
    }

    /// Queue a new async request.
    ///
    /// Ignored if the id is already queued, executing, suspended or completed, or if the
    /// request is not async.
    pub fn submit(&mut self, request: &Request, now: SimTime) -> bool {
        if request.kind != RequestType::Async {
            tracing::warn!(request_id = request.id, "Event loop only accepts async requests");
            return false;
        }
        if !self.ledger.admit(request.id) {
            self.stats.duplicates_ignored += 1;
            tracing::debug!(request_id = request.id, "Ignoring duplicate event loop submission");
            return false;
        }
        self.queue.push_back(EventLoopTask::new(request.id, now));
        self.stats.admitted += 1;
        true
    }

    /// Put a task that finished its external call back at the tail of the queue
    pub fn report_external_call_return(
        &mut self,
        id: RequestId,
        now: SimTime,
    ) -> bool {
        if self.ledger.state(id) != Some(TaskState::AwaitingExternal) {
            tracing::warn!(request_id = id, "External call return for a task not awaiting one");
            return false;
        }
        self.ledger.transition(id, TaskState::Queued);
        self.queue.push_back(EventLoopTask::resumed(id, now));
        true
    }

    /// Move the head of the queue into the execution slot if the slot is free.
    ///
    /// Returns the id of the task that started, if any.
    pub fn tick<T>(&mut self, timeline: &mut T, out: &mut Vec<EngineEvent>) -> Option<RequestId>
    where
        T: Timeline<EventLoopTimer> + ?Sized,
    {
        if self.executing.is_some() {
            return None;
        }
        let mut task = self.queue.pop_front()?;
        self.ledger.transition(task.id, TaskState::Assigned);

        let (kind, delay) = if task.is_new_task {
            task.db_phase = DbPhase::PreAwait;
            self.stats.started += 1;
            (EventLoopTimerKind::Suspend, self.sampler.sample(self.latency.pre_call))
        } else {
            task.db_phase = DbPhase::PostAwait;
            self.stats.resumed += 1;
            (EventLoopTimerKind::Complete, self.sampler.sample(self.latency.post_call))
        };

        let id = task.id;
        tracing::debug!(request_id = id, db_phase = ?task.db_phase, ?delay, "Event loop executing");
        timeline.schedule_after(delay, EventLoopTimer { epoch: self.epoch, id, kind });
        out.push(EngineEvent::TaskStarted {
            id,
            kind: RequestType::Async,
            db_phase: task.db_phase,
            slot: None,
        });
        self.executing = Some(task);
        Some(id)
    }

    /// Handle one of this engine's timers firing
    pub fn on_timer<T>(&mut self, timer: EventLoopTimer, timeline: &mut T, out: &mut Vec<EngineEvent>)
    where
        T: Timeline<EventLoopTimer> + ?Sized,
    {
        if timer.epoch != self.epoch {
            self.stats.stale_timers += 1;
            tracing::debug!(request_id = timer.id, "Dropping event loop timer from a previous run");
            return;
        }

        match timer.kind {
            EventLoopTimerKind::Suspend => {
                if self.vacate_slot(timer.id).is_none() {
                    return;
                }
                // the wrapper is dropped here; a fresh one is queued when the call returns
                self.ledger.transition(timer.id, TaskState::AwaitingExternal);
                out.push(EngineEvent::ExternalCall {
                    id: timer.id,
                    kind: RequestType::Async,
                    action: CallAction::Add,
                });
                let delay = self.sampler.sample(self.latency.external_call);
                timeline.schedule_after(delay, EventLoopTimer {
                    epoch: self.epoch,
                    id: timer.id,
                    kind: EventLoopTimerKind::ExternalCallReturn,
                });
            }
            EventLoopTimerKind::ExternalCallReturn => {
                out.push(EngineEvent::ExternalCall {
                    id: timer.id,
                    kind: RequestType::Async,
                    action: CallAction::Remove,
                });
                self.report_external_call_return(timer.id, timeline.now());
            }
            EventLoopTimerKind::Complete => {
                if self.vacate_slot(timer.id).is_none() {
                    return;
                }
                self.ledger.transition(timer.id, TaskState::Completed);
                self.stats.completed += 1;
                tracing::debug!(request_id = timer.id, "Event loop task completed");
                out.push(EngineEvent::Completed { id: timer.id, kind: RequestType::Async });
            }
        }
    }

    fn vacate_slot(&mut self, id: RequestId) -> Option<EventLoopTask> {
        match &self.executing {
            Some(task) if task.id == id => self.executing.take(),
            _ => {
                tracing::warn!(request_id = id, "Timer fired for a task not in the execution slot");
                None
            }
        }
    }

    /// Clear all state unconditionally. Timers armed before the reset become no-ops.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.executing = None;
        self.ledger.clear();
        self.stats = EventLoopStats::default();
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued tasks, head first
    pub fn queued(&self) -> impl Iterator<Item = &EventLoopTask> {
        self.queue.iter()
    }

    pub fn executing(&self) -> Option<&EventLoopTask> {
        self.executing.as_ref()
    }

    /// Number of tasks in the execution slot, never more than one
    pub fn executing_count(&self) -> usize {
        usize::from(self.executing.is_some())
    }

    /// Tasks suspended in the external call
    pub fn awaiting_external(&self) -> usize {
        self.ledger.count(TaskState::AwaitingExternal)
    }

    /// Tasks admitted and not yet completed
    pub fn in_flight(&self) -> usize {
        self.ledger.in_flight()
    }

    pub fn task_state(&self, id: RequestId) -> Option<TaskState> {
        self.ledger.state(id)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn stats(&self) -> EventLoopStats {
        self.stats
    }
}
