//! `iotflash` downloads an OS image for a single-board IoT device, optionally
//! configures it (locale, keyboard, Wi-Fi, static network, DNS) and writes it
//! to the device: a removable disk for SD-card boards, or the board itself
//! over USB and its serial console for modules flashed in place.
//!
//! Images that need editing are extracted, mounted and configured in a
//! *staging environment*, a small sandbox reached over SSH, so the host never
//! has to mount foreign file systems.
//!
//! Every device goes through the same workflow, implemented as a state
//! machine in [`flasher`]:
//!
//! * **Prepare**: get the image where it is needed and extract it.
//! * **Configure**: collect the operator's answers and write them.
//! * **Write**: put the image on the device.
//! * **Done**: report and release what the run acquired.
//!
//! What each stage does for a given device is decided by its family, see
//! [`devices`]. The first failing stage ends the run; nothing after it runs.
//!
//! Long operations (downloads, extraction, raw disk writes, vendor flashing
//! tools) run on a worker thread while the terminal shows a spinner, see
//! [`job`].

pub mod commands;
pub mod config;
pub mod configure;
pub mod devices;
pub mod dialog;
pub mod error;
pub mod flasher;
pub mod image;
pub mod job;
pub mod logging;
pub mod manifest;
pub mod mount;
pub mod repository;
pub mod serial;
pub mod settings;
pub mod staging;
pub mod workstation;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use settings::{Settings, SettingsBuilder};
