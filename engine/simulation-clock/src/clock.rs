//! Core SimulationClock implementation: virtual time and the discrete-event scheduler

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClockError;

/// A point on the virtual timeline, in milliseconds since the scheduler was created
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_since(self, earlier: SimTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(duration_millis(rhs)))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Anything that can arm timers on the virtual timeline.
///
/// Engines are written against this trait so they never see the concrete event type of
/// the scheduler that ultimately owns their timers.
pub trait Timeline<E> {
    /// Current virtual time
    fn now(&self) -> SimTime;

    /// Fire `event` once, `delay` after now
    fn schedule_after(&mut self, delay: Duration, event: E);

    /// Fire `event` every `period`, first firing one period from now
    fn schedule_every(&mut self, period: Duration, event: E);
}

/// Adapts a parent timeline so a component can schedule its own event type on it.
pub struct MapTimeline<'a, T: ?Sized, F, P> {
    inner: &'a mut T,
    map: F,
    _parent: PhantomData<fn() -> P>,
}

impl<'a, T: ?Sized, F, P> MapTimeline<'a, T, F, P> {
    pub fn new<E>(inner: &'a mut T, map: F) -> Self
    where
        T: Timeline<P>,
        F: Fn(E) -> P,
    {
        Self { inner, map, _parent: PhantomData }
    }
}

impl<'a, T, F, P, E> Timeline<E> for MapTimeline<'a, T, F, P>
where
    T: Timeline<P> + ?Sized,
    F: Fn(E) -> P,
{
    fn now(&self) -> SimTime {
        self.inner.now()
    }

    fn schedule_after(&mut self, delay: Duration, event: E) {
        let mapped = (self.map)(event);
        self.inner.schedule_after(delay, mapped);
    }

    fn schedule_every(&mut self, period: Duration, event: E) {
        let mapped = (self.map)(event);
        self.inner.schedule_every(period, mapped);
    }
}

/// An entry in the scheduler's queue
#[derive(Debug, Clone)]
pub struct Scheduled<E> {
    pub fire_at: SimTime,
    pub event: E,
    seq: u64,
    period: Option<Duration>,
}

impl<E> Scheduled<E> {
    /// Whether this entry re-arms itself after firing
    pub fn is_recurring(&self) -> bool {
        self.period.is_some()
    }
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // BinaryHeap is a max-heap; earliest fire time (then earliest insertion) must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.fire_at.cmp(&self.fire_at).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Discrete-event scheduler: a priority queue of (fire time, event) pairs over a virtual clock.
///
/// Entries with equal fire times are delivered in the order they were scheduled. Popping an
/// entry moves the clock to its fire time; nothing ever runs concurrently.
pub struct Scheduler<E> {
    now: SimTime,
    queue: BinaryHeap<Scheduled<E>>,
    next_seq: u64,
    recurring: usize,
    fired: u64,
}

impl<E: Clone> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> Scheduler<E> {
    /// Create an empty scheduler at time zero
    pub fn new() -> Self {
        Self { now: SimTime::ZERO, queue: BinaryHeap::new(), next_seq: 0, recurring: 0, fired: 0 }
    }

    /// Current virtual time
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of pending entries, recurring ones included
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of pending one-shot entries
    pub fn pending_one_shot(&self) -> usize {
        self.queue.len() - self.recurring
    }

    /// Total number of entries delivered so far
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Fire time of the next entry, if any
    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|entry| entry.fire_at)
    }

    fn push(&mut self, fire_at: SimTime, period: Option<Duration>, event: E) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if period.is_some() {
            self.recurring += 1;
        }
        self.queue.push(Scheduled { fire_at, event, seq, period });
    }

    /// Deliver the next entry, advancing the clock to its fire time.
    ///
    /// Recurring entries are re-armed one period later before being returned.
    pub fn pop_next(&mut self) -> Option<Scheduled<E>> {
        let entry = self.queue.pop()?;
        debug_assert!(entry.fire_at >= self.now, "scheduler went backwards");
        self.now = entry.fire_at;
        self.fired += 1;

        if let Some(period) = entry.period {
            // re-armed entry keeps the recurring count unchanged
            let seq = self.next_seq;
            self.next_seq += 1;
            self.queue.push(Scheduled {
                fire_at: entry.fire_at + period,
                event: entry.event.clone(),
                seq,
                period: Some(period),
            });
        }

        Some(entry)
    }

    /// Deliver the next entry only if it fires at or before `until`
    pub fn pop_due(&mut self, until: SimTime) -> Option<Scheduled<E>> {
        match self.peek_time() {
            Some(at) if at <= until => self.pop_next(),
            _ => None,
        }
    }

    /// Move the clock forward without delivering anything.
    ///
    /// Fails if that would go backwards or skip over an undelivered entry.
    pub fn advance_to(&mut self, target: SimTime) -> Result<(), ClockError> {
        if target < self.now {
            return Err(ClockError::TimeWentBackwards { now: self.now, requested: target });
        }
        if let Some(next) = self.peek_time() {
            if next < target {
                return Err(ClockError::PendingEventSkipped { next, requested: target });
            }
        }
        self.now = target;
        Ok(())
    }

    /// Drop every pending entry, one-shot and recurring. Returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.recurring = 0;
        if dropped > 0 {
            tracing::debug!(dropped, now = %self.now, "Cancelled pending timers");
        }
        dropped
    }
}

impl<E: Clone> Timeline<E> for Scheduler<E> {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule_after(&mut self, delay: Duration, event: E) {
        let at = self.now + delay;
        self.push(at, None, event);
    }

    fn schedule_every(&mut self, period: Duration, event: E) {
        // a zero period would re-fire forever without the clock moving
        let period = period.max(Duration::from_millis(1));
        let at = self.now + period;
        self.push(at, Some(period), event);
    }
}
