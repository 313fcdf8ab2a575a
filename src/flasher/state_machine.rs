//! The device flashing workflow as a state machine.
//!
//! Every device goes through the same four stages. What each stage does is
//! decided by the [`Flasher`]'s composition; the order and the failure
//! semantics are decided here:
//!
//! ```text
//!                START
//!                  |
//!                  v
//!            .-----------.
//!            |  Prepare  |------------.
//!            '-----------'            |
//!                  |                  |
//!                  v                  |
//!            .-----------.            |
//!            | Configure |----------. |
//!            '-----------'          | |
//!                  |                | |
//!                  v              error
//!            .-----------.          | |
//!            |   Write   |--------. | |
//!            '-----------'        | | |
//!                  |              v v v
//!                  v           .--------.
//!            .-----------.     | Failed |
//!            |   Done    |---->'--------'
//!            '-----------'         |
//!                  |               |
//!                  v               |
//!            .-----------.         |
//!            |   Exit    |<--------'
//!            '-----------'
//!                  |
//!                  v
//!                 END
//! ```
//!
//! The first stage returning an error moves the machine to `Failed`; no other
//! stage runs after that and the error is returned by [`Flasher::flash`].

use std::time::Instant;

use log::info;

use super::{
    context::FlashContext,
    events::*,
    stages::{Configurer, Finisher, Preparer, Writer},
    states::*,
};
use crate::error::Result;

// =============================================================================
// Public Interface
// =============================================================================

/// A device flasher: one strategy per stage, selected by device family.
pub struct Flasher {
    name: String,
    pub(super) preparer: Box<dyn Preparer>,
    pub(super) configurer: Box<dyn Configurer>,
    pub(super) writer: Box<dyn Writer>,
    pub(super) finisher: Box<dyn Finisher>,
}

impl Flasher {
    pub fn new(
        name: &str,
        preparer: Box<dyn Preparer>,
        configurer: Box<dyn Configurer>,
        writer: Box<dyn Writer>,
        finisher: Box<dyn Finisher>,
    ) -> Self {
        Flasher {
            name: name.to_owned(),
            preparer,
            configurer,
            writer,
            finisher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run Prepare, Configure, Write and Done in order, stopping at the first
    /// error.
    pub fn flash(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        info!(
            "Flashing {} with {} ({})",
            ctx.profile.name, ctx.image.title, self.name
        );
        let mut sm = FlasherStates::Prepare(FlasherStateMachine::new());
        loop {
            sm = match sm.step(self, ctx) {
                FlasherStates::Exit(mut sm) => return sm.state.take_result(sm.started),
                other => other,
            };
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

// -----------------------------------------------------------------------------
// The State Machine
// -----------------------------------------------------------------------------

/// The generic holder of the current state, plus the data shared by all
/// states.
#[derive(Debug)]
struct FlasherStateMachine<S: Runnable> {
    started: Instant,
    state: S,
}
impl<S: Runnable> FlasherStateMachine<S> {
    fn run(&mut self, flasher: &Flasher, ctx: &mut FlashContext<'_>) -> Event {
        self.state.run(flasher, ctx, self.started)
    }
}

/// The machine starts in the `PrepareState`.
impl FlasherStateMachine<PrepareState> {
    fn new() -> Self {
        FlasherStateMachine {
            started: Instant::now(),
            state: PrepareState {},
        }
    }
}

enum FlasherStates {
    Prepare(FlasherStateMachine<PrepareState>),
    Configure(FlasherStateMachine<ConfigureState>),
    Write(FlasherStateMachine<WriteState>),
    Done(FlasherStateMachine<DoneState>),
    Failed(FlasherStateMachine<FailedState>),
    Exit(FlasherStateMachine<ExitState>),
}
impl FlasherStates {
    fn step(self, flasher: &Flasher, ctx: &mut FlashContext<'_>) -> Self {
        match self {
            FlasherStates::Prepare(mut sm) => {
                let event = sm.run(flasher, ctx);
                match event {
                    Event::Configure(ev) => FlasherStates::Configure(ev.into()),
                    Event::Failed(ev) => FlasherStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            FlasherStates::Configure(mut sm) => {
                let event = sm.run(flasher, ctx);
                match event {
                    Event::Write(ev) => FlasherStates::Write(ev.into()),
                    Event::Failed(ev) => FlasherStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            FlasherStates::Write(mut sm) => {
                let event = sm.run(flasher, ctx);
                match event {
                    Event::Done(ev) => FlasherStates::Done(ev.into()),
                    Event::Failed(ev) => FlasherStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            FlasherStates::Done(mut sm) => {
                let event = sm.run(flasher, ctx);
                match event {
                    Event::Exit(ev) => FlasherStates::Exit(ev.into()),
                    Event::Failed(ev) => FlasherStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            FlasherStates::Failed(mut sm) => {
                let event = sm.run(flasher, ctx);
                match event {
                    Event::Exit(ev) => FlasherStates::Exit(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            FlasherStates::Exit(mut sm) => {
                let event = sm.run(flasher, ctx);
                match event {
                    Event::Exit(ev) => FlasherStates::Exit(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<ConfigureEvent> for FlasherStateMachine<ConfigureState> {
    fn from(event: ConfigureEvent) -> FlasherStateMachine<ConfigureState> {
        FlasherStateMachine {
            started: event.started,
            state: ConfigureState {},
        }
    }
}

impl From<WriteEvent> for FlasherStateMachine<WriteState> {
    fn from(event: WriteEvent) -> FlasherStateMachine<WriteState> {
        FlasherStateMachine {
            started: event.started,
            state: WriteState {},
        }
    }
}

impl From<DoneEvent> for FlasherStateMachine<DoneState> {
    fn from(event: DoneEvent) -> FlasherStateMachine<DoneState> {
        FlasherStateMachine {
            started: event.started,
            state: DoneState {},
        }
    }
}

impl From<FailedEvent> for FlasherStateMachine<FailedState> {
    fn from(event: FailedEvent) -> FlasherStateMachine<FailedState> {
        FlasherStateMachine {
            started: event.started,
            state: FailedState {
                stage: event.stage,
                error: Some(event.error),
            },
        }
    }
}

impl From<ExitEvent> for FlasherStateMachine<ExitState> {
    fn from(event: ExitEvent) -> FlasherStateMachine<ExitState> {
        FlasherStateMachine {
            started: event.started,
            state: ExitState {
                result: Some(event.result),
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        error::Error,
        flasher::Stage,
        testing::Fixture,
    };

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    /// Records every stage it is asked to run and fails the one named in
    /// `fail_at`.
    #[derive(Clone)]
    struct Recorder {
        journal: Journal,
        fail_at: Option<&'static str>,
    }

    impl Recorder {
        fn record(&self, stage: &'static str) -> Result<()> {
            self.journal.lock().unwrap().push(stage);
            if self.fail_at == Some(stage) {
                Err(Error::Other(format!("{} failed", stage)))
            } else {
                Ok(())
            }
        }
    }

    impl Preparer for Recorder {
        fn prepare(&self, _: &mut FlashContext<'_>) -> Result<()> {
            self.record("prepare")
        }
    }
    impl Configurer for Recorder {
        fn configure(&self, _: &mut FlashContext<'_>) -> Result<()> {
            self.record("configure")
        }
    }
    impl Writer for Recorder {
        fn write(&self, _: &mut FlashContext<'_>) -> Result<()> {
            self.record("write")
        }
    }
    impl Finisher for Recorder {
        fn finish(&self, _: &mut FlashContext<'_>) -> Result<()> {
            self.record("done")
        }
    }

    fn flasher(fail_at: Option<&'static str>) -> (Flasher, Journal) {
        let journal = Journal::default();
        let recorder = Recorder {
            journal: journal.clone(),
            fail_at,
        };
        let flasher = Flasher::new(
            "recorder",
            Box::new(recorder.clone()),
            Box::new(recorder.clone()),
            Box::new(recorder.clone()),
            Box::new(recorder),
        );
        (flasher, journal)
    }

    #[test]
    fn stages_run_in_order() {
        let mut fixture = Fixture::new("raspberry-pi");
        let (flasher, journal) = flasher(None);
        flasher.flash(&mut fixture.context()).unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["prepare", "configure", "write", "done"]
        );
    }

    #[test]
    fn a_failing_stage_stops_the_run() {
        for (fail_at, ran) in &[
            ("prepare", vec!["prepare"]),
            ("configure", vec!["prepare", "configure"]),
            ("write", vec!["prepare", "configure", "write"]),
            ("done", vec!["prepare", "configure", "write", "done"]),
        ] {
            let mut fixture = Fixture::new("raspberry-pi");
            let (flasher, journal) = flasher(Some(*fail_at));
            let result = flasher.flash(&mut fixture.context());
            match result {
                Err(Error::Other(msg)) => assert_eq!(msg, format!("{} failed", fail_at)),
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(*journal.lock().unwrap(), *ran);
        }
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Prepare.to_string(), "prepare");
        assert_eq!(Stage::Done.to_string(), "done");
    }
}
