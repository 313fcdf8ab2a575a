//! Background jobs: run one long operation on a worker thread while the
//! calling thread animates a spinner and waits for the outcome.
//!
//! A job is a single-producer/single-consumer rendezvous made of two channels:
//!
//!  * an **activity** channel on which the worker toggles a busy flag, used
//!    only to animate (or pause) the spinner,
//!  * a single-shot **outcome** channel carrying the worker's result.
//!
//! The producer side, [`JobHandle`], reports the outcome through
//! [`JobHandle::done`], [`JobHandle::fail`] or [`JobHandle::finish`], all of
//! which consume the handle. A worker therefore cannot report twice, and a
//! handle dropped without reporting (early return, panic) delivers
//! [`Error::JobAbandoned`] so the waiting side never blocks forever.
//!
//! **Example**
//! ```no_run
//! use iotflash::job;
//!
//! let answer = job::run_with_spinner("Thinking", |handle| {
//!     handle.active(true);
//!     Ok(42)
//! });
//! assert_eq!(answer.unwrap(), 42);
//! ```

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::Duration,
};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

use crate::error::{Error, Result};

/// Spinner animation period.
pub const TICK: Duration = Duration::from_millis(120);

// =============================================================================
// Public Interface
// =============================================================================

/// The producer side of a background job.
pub struct JobHandle<T> {
    activity: Sender<bool>,
    outcome: Option<Sender<Result<T>>>,
}

impl<T> JobHandle<T> {
    /// Toggle the busy indicator shown by the waiting spinner.
    pub fn active(&self, busy: bool) {
        // The waiting side may already be gone; activity is best effort.
        let _ = self.activity.send(busy);
    }

    pub fn done(self, value: T) {
        self.finish(Ok(value))
    }

    pub fn fail(self, err: Error) {
        self.finish(Err(err))
    }

    pub fn finish(mut self, result: Result<T>) {
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(result);
        }
    }
}

impl<T> Drop for JobHandle<T> {
    fn drop(&mut self) {
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(Err(Error::JobAbandoned));
        }
    }
}

/// The consumer side of a background job.
pub struct Job<T> {
    activity: Receiver<bool>,
    outcome: Receiver<Result<T>>,
}

impl<T> Job<T> {
    /// Block until the outcome arrives, without any UI.
    pub fn wait(self) -> Result<T> {
        self.outcome.recv().unwrap_or(Err(Error::JobAbandoned))
    }
}

/// Create the two halves of a background job.
pub fn new_job<T>() -> (JobHandle<T>, Job<T>) {
    let (activity_tx, activity_rx) = mpsc::channel();
    let (outcome_tx, outcome_rx) = mpsc::channel();
    (
        JobHandle {
            activity: activity_tx,
            outcome: Some(outcome_tx),
        },
        Job {
            activity: activity_rx,
            outcome: outcome_rx,
        },
    )
}

/// Block on `job`, animating a spinner labelled `label` while the worker
/// reports itself as active, and return the worker's outcome.
pub fn wait_job_and_spin<T>(label: &str, job: Job<T>) -> Result<T> {
    let pb = spinner();
    pb.set_message(label.to_owned());

    let mut active = true;
    let result = loop {
        while let Ok(busy) = job.activity.try_recv() {
            active = busy;
        }
        match job.outcome.recv_timeout(TICK) {
            Ok(result) => break result,
            Err(RecvTimeoutError::Timeout) => {
                if active {
                    pb.tick();
                }
            }
            Err(RecvTimeoutError::Disconnected) => break Err(Error::JobAbandoned),
        }
    };

    match &result {
        Ok(_) => pb.finish_with_message(format!("{} {}", label, style("done").green())),
        Err(e) => {
            debug!("job `{}` failed: {}", label, e);
            pb.finish_with_message(format!("{} {}", label, style("failed").red()))
        }
    }
    result
}

/// Run `work` on a scoped worker thread and wait for it with a spinner.
///
/// The worker may borrow from the caller's stack; the caller does nothing but
/// animate the spinner until the worker reports.
pub fn run_with_spinner<T, F>(label: &str, work: F) -> Result<T>
where
    T: Send,
    F: FnOnce(&JobHandle<T>) -> Result<T> + Send,
{
    let (handle, job) = new_job();
    thread::scope(|s| {
        s.spawn(move || {
            let result = work(&handle);
            handle.finish(result);
        });
        wait_job_and_spin(label, job)
    })
}

/// The spinner style used for every background job.
pub fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            // For more spinners check out the cli-spinners project:
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓", "✔"])
            .template("[+] {spinner:.blue} {msg}"),
    );
    pb
}

// =============================================================================
// Unit Tests
// =============================================================================
