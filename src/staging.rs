//! The staging environment: an intermediary sandbox (usually a small virtual
//! machine reached over SSH) where images are downloaded to, extracted,
//! mounted and edited without needing host privileges for every step.
//!
//! A [`StagingSession`] is created per run and owned exclusively by the
//! running flasher. Remote commands are issued one at a time through its
//! [`RemoteExecutor`].

mod backend;
mod remote;
mod ssh;

use std::{path::Path, time::Duration};

use log::info;

pub use backend::{CommandOutput, StagingBackend};
pub use remote::{classify, RemoteExecutor, DEFAULT_TIMEOUT};
pub use ssh::SshBackend;

use crate::error::Result;

/// Whether an image partition is currently mounted in the staging
/// environment. Unmounting is only meaningful in the `Attached` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unattached,
    Attached,
}

pub struct StagingSession {
    executor: RemoteExecutor,
    device: String,
    workdir: String,
    mount_point: String,
    running: bool,
    /// Name of the archive or image uploaded to `workdir`.
    pub uploaded: Option<String>,
    /// Raw image file name, relative to `workdir`.
    pub image: Option<String>,
    /// Top-level folder produced by the extraction, for vendor tooling that
    /// works on a directory tree rather than an image.
    pub folder: Option<String>,
    pub mount: MountState,
}

impl StagingSession {
    pub fn new(
        backend: Box<dyn StagingBackend>,
        device: &str,
        workdir: &str,
        mount_point: &str,
    ) -> Self {
        StagingSession {
            executor: RemoteExecutor::new(backend),
            device: device.to_owned(),
            workdir: workdir.trim_end_matches('/').to_owned(),
            mount_point: mount_point.trim_end_matches('/').to_owned(),
            running: false,
            uploaded: None,
            image: None,
            folder: None,
            mount: MountState::Unattached,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        info!("Starting the staging environment for {}", self.device);
        self.executor.backend().start()?;
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        info!("Stopping the staging environment");
        self.executor.backend().stop()?;
        self.running = false;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn exec(&mut self, command: &str) -> Result<String> {
        self.executor.exec(command)
    }

    pub fn exec_with_timeout(&mut self, command: &str, timeout: Duration) -> Result<String> {
        self.executor.exec_with_timeout(command, timeout)
    }

    pub fn upload(&mut self, src: &Path, dst: &str) -> Result<()> {
        self.executor.backend().scp(src, dst)
    }

    pub fn download(&mut self, src: &str, dst: &Path) -> Result<()> {
        self.executor.backend().scp_from(src, dst)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    /// Absolute remote path of a file in the work directory.
    pub fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.workdir, name)
    }

    /// Absolute remote path of the extracted image, if one is known.
    pub fn image_path(&self) -> Option<String> {
        self.image.as_ref().map(|name| self.remote_path(name))
    }
}

/// Quote `value` for a POSIX shell. Plain words are left alone.
pub fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if plain {
        value.to_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
