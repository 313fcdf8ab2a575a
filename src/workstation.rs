//! The host the tool runs on: removable disk discovery and raw writes.
//!
//! One implementation per host operating system; [`host`] picks the one
//! matching the platform the binary was built for.

mod linux;
mod macos;
mod windows;

use std::{path::Path, process::Command};

use indicatif::HumanBytes;
use log::debug;

pub use linux::LinuxWorkStation;
pub use macos::MacWorkStation;
pub use windows::WindowsWorkStation;

use crate::{
    dialog::Dialog,
    error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// Short name, e.g. `sdb`, `disk4` or `2`.
    pub name: String,
    /// Device node written to.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    pub model: String,
}

impl Disk {
    pub fn describe(&self) -> String {
        let model: &str = if self.model.is_empty() {
            "unknown model"
        } else {
            &self.model
        };
        format!("{} ({}, {})", self.path, model, HumanBytes(self.size))
    }
}

pub trait WorkStation: Send + Sync {
    fn list_removable_disks(&self) -> Result<Vec<Disk>>;

    /// Raw-copy `image` onto `disk`. Blocks until the data is flushed.
    fn write_to_disk(&self, image: &Path, disk: &Disk) -> Result<()>;

    fn unmount(&self, disk: &Disk) -> Result<()>;

    fn eject(&self, disk: &Disk) -> Result<()>;

    /// Remove every partition and file system signature from `disk`.
    fn clean_disk(&self, disk: &Disk) -> Result<()>;

    /// Run a vendor flashing tool (`esptool.py`, `flashall.sh`) on the host.
    fn run_tool(&self, program: &str, args: &[&str]) -> Result<String> {
        run(program, args)
    }
}

/// The workstation for the current platform.
pub fn host() -> Box<dyn WorkStation> {
    if cfg!(target_os = "windows") {
        Box::new(WindowsWorkStation)
    } else if cfg!(target_os = "macos") {
        Box::new(MacWorkStation)
    } else {
        Box::new(LinuxWorkStation)
    }
}

/// Pick the disk to write: the one named `requested`, or the operator's
/// choice among the removable disks. Without a prompt (`quiet`) only a lone
/// removable disk can be picked.
pub fn select_disk(
    workstation: &dyn WorkStation,
    dialog: &mut dyn Dialog,
    requested: Option<&str>,
    quiet: bool,
) -> Result<Disk> {
    let disks = workstation.list_removable_disks()?;
    if let Some(requested) = requested {
        return disks
            .into_iter()
            .find(|disk| disk.path == requested || disk.name == requested)
            .ok_or_else(|| Error::Other(format!("{} is not a removable disk", requested)));
    }
    match disks.len() {
        0 => Err(Error::Other("no removable disk found".into())),
        1 if quiet => Ok(disks[0].clone()),
        _ if quiet => Err(Error::Other(
            "several removable disks found, pick one with --disk".into(),
        )),
        _ => {
            let items: Vec<String> = disks.iter().map(Disk::describe).collect();
            let index = dialog.select("Select the disk to write", &items, 0)?;
            Ok(disks[index].clone())
        }
    }
}

/// Run a host command and return its stdout. A non-zero status is an error
/// carrying stderr.
pub(crate) fn run(program: &str, args: &[&str]) -> Result<String> {
    let line = format!("{} {}", program, args.join(" "));
    debug!("[host] {}", line);
    let output = Command::new(program).args(args).output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Other(format!("{}: {}", line, stderr.trim())));
    }
    Ok(stdout)
}

/// Like [`run`], through `sudo` unless already running as root.
#[cfg(unix)]
pub(crate) fn run_privileged(program: &str, args: &[&str]) -> Result<String> {
    let uid = run("id", &["-u"])?;
    if uid.trim() == "0" {
        run(program, args)
    } else {
        let mut full = vec![program];
        full.extend_from_slice(args);
        run("sudo", &full)
    }
}

#[cfg(not(unix))]
pub(crate) fn run_privileged(program: &str, args: &[&str]) -> Result<String> {
    run(program, args)
}
