//! The capability set the workflow needs from a staging environment.

use std::{path::Path, time::Duration};

use crate::error::Result;

/// Raw result of a remote command, before any classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn stdout(text: &str) -> Self {
        CommandOutput {
            stdout: text.to_owned(),
            ..Default::default()
        }
    }

    pub fn stderr(text: &str) -> Self {
        CommandOutput {
            stderr: text.to_owned(),
            exit_status: 1,
            ..Default::default()
        }
    }
}

/// A remote shell with file transfer. The workflow does not care whether it
/// is backed by a virtual machine, a container or a bare SSH host.
pub trait StagingBackend: Send {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Run `command` and return its raw output. Only transport failures are
    /// errors at this level.
    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Copy a host file to `dst` in the staging environment.
    fn scp(&mut self, src: &Path, dst: &str) -> Result<()>;

    /// Copy `src` from the staging environment to a host file.
    fn scp_from(&mut self, src: &str, dst: &Path) -> Result<()>;
}
