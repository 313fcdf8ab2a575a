//! The device flashing workflow.
//!
//! A [`Flasher`] composes one [`Preparer`], [`Configurer`], [`Writer`] and
//! [`Finisher`] and runs them, in that order, over a [`FlashContext`]. The
//! device families in [`devices`](crate::devices) provide the compositions.
//!
//! **Example** - Flashing the device named in the settings:
//! ```ignore
//! let flasher = devices::factory(&ctx.profile);
//! flasher.flash(&mut ctx)?;
//! ```

mod context;
mod events;
mod stages;
mod state_machine;
mod states;

pub use context::{staged, FlashContext};
pub use stages::{Configurer, Finisher, Preparer, Stage, Writer};
pub use state_machine::Flasher;
