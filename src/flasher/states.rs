//! States for the flashing state machine.
//!
//! This modules is private and restricted to the [`flasher`](crate::flasher)
//! scope. Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::time::Instant;

use console::style;
use log::{error, info};

use super::{context::FlashContext, events::*, stages::Stage, state_machine::Flasher};
use crate::error::{Error, Result};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// Do the work of the state, then request the transition to the next one
    /// by returning the appropriate `event`. The `event` is consumed to create
    /// the new `state` using the corresponding `From` implementation.
    fn run(&mut self, flasher: &Flasher, ctx: &mut FlashContext<'_>, started: Instant) -> Event;
}

// Prepare State ===============================================================

/// The initial state: acquire the image.
///
///  * **`ConfigureEvent` => `ConfigureState`** when the image is ready,
///  * **`FailedEvent` => `FailedState`** otherwise.
#[derive(Debug)]
pub(crate) struct PrepareState {}
impl Runnable for PrepareState {
    fn run(&mut self, flasher: &Flasher, ctx: &mut FlashContext<'_>, started: Instant) -> Event {
        info!("=> Prepare");
        let outcome = flasher.preparer.prepare(ctx);
        Event::after(Stage::Prepare, started, outcome, |started| {
            Event::Configure(ConfigureEvent { started })
        })
    }
}

// Configure State =============================================================

#[derive(Debug)]
pub(crate) struct ConfigureState {}
impl Runnable for ConfigureState {
    fn run(&mut self, flasher: &Flasher, ctx: &mut FlashContext<'_>, started: Instant) -> Event {
        info!("=> Configure");
        let outcome = flasher.configurer.configure(ctx);
        Event::after(Stage::Configure, started, outcome, |started| {
            Event::Write(WriteEvent { started })
        })
    }
}

// Write State =================================================================

#[derive(Debug)]
pub(crate) struct WriteState {}
impl Runnable for WriteState {
    fn run(&mut self, flasher: &Flasher, ctx: &mut FlashContext<'_>, started: Instant) -> Event {
        info!("=> Write");
        let outcome = flasher.writer.write(ctx);
        Event::after(Stage::Write, started, outcome, |started| {
            Event::Done(DoneEvent { started })
        })
    }
}

// Done State ==================================================================

#[derive(Debug)]
pub(crate) struct DoneState {}
impl Runnable for DoneState {
    fn run(&mut self, flasher: &Flasher, ctx: &mut FlashContext<'_>, started: Instant) -> Event {
        info!("=> Done");
        let outcome = flasher.finisher.finish(ctx);
        Event::after(Stage::Done, started, outcome, |started| {
            Event::Exit(ExitEvent {
                started,
                result: Ok(()),
            })
        })
    }
}

// Failed State ================================================================

/// A stage failed: nothing else runs, the error goes back to the caller.
#[derive(Debug)]
pub(crate) struct FailedState {
    pub stage: Stage,
    pub error: Option<Error>,
}
impl Runnable for FailedState {
    fn run(&mut self, _: &Flasher, _: &mut FlashContext<'_>, started: Instant) -> Event {
        let error = self.error.take().unwrap_or(Error::JobAbandoned);
        match &error {
            Error::Declined => info!("=> Failed: {} stage declined", self.stage),
            e => error!("=> Failed in the {} stage: {}", self.stage, e),
        }
        Event::Exit(ExitEvent {
            started,
            result: Err(error),
        })
    }
}

// Exit State ==================================================================

/// Terminal state. The event loop stops as soon as it is reached.
#[derive(Debug)]
pub(crate) struct ExitState {
    pub result: Option<Result<()>>,
}
impl ExitState {
    pub(crate) fn take_result(&mut self, started: Instant) -> Result<()> {
        let result = self.result.take().unwrap_or(Ok(()));
        if result.is_ok() {
            println!(
                "[+] Finished in {}",
                style(indicatif::HumanDuration(started.elapsed())).green()
            );
        }
        result
    }
}
impl Runnable for ExitState {
    fn run(&mut self, _: &Flasher, _: &mut FlashContext<'_>, started: Instant) -> Event {
        Event::Exit(ExitEvent {
            started,
            result: self.result.take().unwrap_or(Ok(())),
        })
    }
}
