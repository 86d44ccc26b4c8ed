//! Error types for SimulationClock

use thiserror::Error;

use crate::clock::SimTime;

/// Errors that can occur while driving the virtual clock
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Cannot move clock from {now} back to {requested}")]
    TimeWentBackwards { now: SimTime, requested: SimTime },

    #[error("Cannot advance to {requested}: an event is pending at {next}")]
    PendingEventSkipped { next: SimTime, requested: SimTime },
}
