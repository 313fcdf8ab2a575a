//! Runs commands in the staging environment and classifies their outcome.

use std::time::Duration;

use log::debug;

use super::backend::{CommandOutput, StagingBackend};
use crate::{
    error::{Error, Result},
    logging::redact,
};

/// Timeout applied to ordinary remote commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Wraps an established staging backend. A command succeeds when its
/// transport succeeded and it wrote nothing to standard error, whatever its
/// exit status; many of the tools used here report problems on stderr only.
pub struct RemoteExecutor {
    backend: Box<dyn StagingBackend>,
}

impl RemoteExecutor {
    pub fn new(backend: Box<dyn StagingBackend>) -> Self {
        RemoteExecutor { backend }
    }

    pub fn exec(&mut self, command: &str) -> Result<String> {
        self.exec_with_timeout(command, DEFAULT_TIMEOUT)
    }

    /// Run `command` and return its trimmed standard output.
    pub fn exec_with_timeout(&mut self, command: &str, timeout: Duration) -> Result<String> {
        debug!("[exec] {}", redact(command));
        let output = self.backend.run(command, timeout)?;
        classify(command, output)
    }

    pub fn backend(&mut self) -> &mut dyn StagingBackend {
        self.backend.as_mut()
    }
}

/// Turn a raw command output into trimmed stdout or an [`Error::Remote`]
/// carrying the trimmed stderr.
pub fn classify(command: &str, output: CommandOutput) -> Result<String> {
    let stdout = output.stdout.trim();
    let stderr = output.stderr.trim();
    debug!("[stdout] {}", stdout);
    debug!("[stderr] {}", stderr);
    if output.exit_status != 0 {
        debug!("[status] {}", output.exit_status);
    }

    if !stderr.is_empty() {
        return Err(Error::Remote {
            command: redact(command),
            stderr: stderr.to_owned(),
        });
    }
    Ok(stdout.to_owned())
}
