//! Events for the flashing state machine.
//!
//! This modules is private and restricted to the [`flasher`](crate::flasher)
//! scope. Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::time::Instant;

use super::stages::Stage;
use crate::error::{Error, Result};

// =============================================================================
// Crate-Public Interface
// =============================================================================

// ConfigureEvent ==============================================================

/// Fired when the `Prepare` stage succeeded. Triggers the transition to the
/// `Configure` state.
#[derive(Debug)]
pub(crate) struct ConfigureEvent {
    pub started: Instant,
}

// WriteEvent ==================================================================

/// Fired when the `Configure` stage succeeded, including when the operator
/// chose not to configure anything.
#[derive(Debug)]
pub(crate) struct WriteEvent {
    pub started: Instant,
}

// DoneEvent ===================================================================

/// Fired when the image was written. Triggers the transition to the `Done`
/// state which reports to the operator.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub started: Instant,
}

// FailedEvent =================================================================

/// Fired by any stage that returns an error. None of the remaining stages
/// run after it.
#[derive(Debug)]
pub(crate) struct FailedEvent {
    pub started: Instant,
    pub stage: Stage,
    pub error: Error,
}

// ExitEvent ===================================================================

/// The last event of a run, carrying its outcome back to the caller of
/// [`Flasher::flash`](super::Flasher::flash).
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub started: Instant,
    pub result: Result<()>,
}

// Events enum =================================================================

#[derive(Debug)]
pub(crate) enum Event {
    Configure(ConfigureEvent),
    Write(WriteEvent),
    Done(DoneEvent),
    Failed(FailedEvent),
    Exit(ExitEvent),
}

impl Event {
    /// The event a stage outcome leads to: `next` on success, `Failed`
    /// otherwise.
    pub(crate) fn after(
        stage: Stage,
        started: Instant,
        outcome: Result<()>,
        next: impl FnOnce(Instant) -> Event,
    ) -> Event {
        match outcome {
            Ok(()) => next(started),
            Err(error) => Event::Failed(FailedEvent {
                started,
                stage,
                error,
            }),
        }
    }
}
