//! The four capabilities a device flasher is composed of.
//!
//! Each device family picks one implementation per capability; the state
//! machine only ever sees the traits. Overriding a single stage for a device
//! means swapping a single box.

use std::fmt;

use super::context::FlashContext;
use crate::error::Result;

/// Lifecycle stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Configure,
    Write,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prepare => "prepare",
            Stage::Configure => "configure",
            Stage::Write => "write",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Get the image (and whatever environment it needs) ready.
pub trait Preparer {
    fn prepare(&self, ctx: &mut FlashContext<'_>) -> Result<()>;
}

/// Collect and, where the image allows it, apply the device configuration.
pub trait Configurer {
    fn configure(&self, ctx: &mut FlashContext<'_>) -> Result<()>;
}

/// Transfer the image to the device or its storage.
pub trait Writer {
    fn write(&self, ctx: &mut FlashContext<'_>) -> Result<()>;
}

/// Report the outcome and release what the run started.
pub trait Finisher {
    fn finish(&self, ctx: &mut FlashContext<'_>) -> Result<()>;
}
