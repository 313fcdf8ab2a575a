//! Staging backend reached over SSH.

use std::{
    fs::File,
    io::{self, Read},
    net::TcpStream,
    path::Path,
    process::Command,
    time::Duration,
};

use log::{debug, info};
use retry::{delay, retry_with_index};
use ssh2::Session;

use super::backend::{CommandOutput, StagingBackend};
use crate::{
    config::{SshAuth, StagingConfig},
    error::{Error, Result},
};

/// Talks to the staging environment with `ssh2`. When the configuration has
/// host-side start/stop commands, they boot and power off the sandbox around
/// the SSH session.
pub struct SshBackend {
    config: StagingConfig,
    session: Option<Session>,
}

impl SshBackend {
    pub fn new(config: StagingConfig) -> Self {
        SshBackend {
            config,
            session: None,
        }
    }

    fn connect(&self) -> Result<Session> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let tcp = TcpStream::connect(&address)
            .map_err(|e| Error::Transport(format!("connecting to {}: {}", address, e)))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        let user = &self.config.username;
        match &self.config.auth {
            SshAuth::Agent => session.userauth_agent(user)?,
            SshAuth::Key(key) => session.userauth_pubkey_file(user, None, key, None)?,
            SshAuth::Password(password) => session.userauth_password(user, password)?,
        }
        if !session.authenticated() {
            return Err(Error::Transport(format!(
                "authentication failed for {}@{}",
                user, address
            )));
        }
        Ok(session)
    }

    fn session(&mut self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::Transport("staging environment is not started".into()))
    }
}

impl StagingBackend for SshBackend {
    fn start(&mut self) -> Result<()> {
        if let Some(command) = &self.config.start_command {
            run_host_command(command)?;
        }

        // The sandbox may still be booting; give sshd some time to come up.
        let result = retry_with_index(delay::Fixed::from_millis(3000).take(20), |index| {
            debug!("Trying to reach the staging environment ({})", index);
            self.connect()
        });
        match result {
            Ok(session) => {
                info!(
                    "Connected to the staging environment at {}:{}",
                    self.config.host, self.config.port
                );
                self.session = Some(session);
                Ok(())
            }
            Err(retry::Error::Operation { error, tries, .. }) => {
                info!("Failed to reach the staging environment after {} tries", tries);
                Err(error)
            }
            Err(retry::Error::Internal(msg)) => Err(Error::Transport(msg)),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "bye", None);
        }
        if let Some(command) = &self.config.stop_command {
            run_host_command(command)?;
        }
        Ok(())
    }

    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let session = self.session()?;
        session.set_timeout(timeout.as_millis() as u32);

        let mut channel = session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;
        channel.wait_close()?;

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_status: channel.exit_status()?,
        })
    }

    fn scp(&mut self, src: &Path, dst: &str) -> Result<()> {
        info!("Copying {} to the staging environment at {}", src.display(), dst);
        let session = self.session()?;
        session.set_timeout(0);

        let size = src.metadata()?.len();
        let mut local = File::open(src)?;
        let mut remote = session.scp_send(Path::new(dst), 0o644, size, None)?;
        io::copy(&mut local, &mut remote)?;

        remote.send_eof()?;
        remote.wait_eof()?;
        remote.close()?;
        remote.wait_close()?;
        Ok(())
    }

    fn scp_from(&mut self, src: &str, dst: &Path) -> Result<()> {
        info!("Copying {} out of the staging environment to {}", src, dst.display());
        let session = self.session()?;
        session.set_timeout(0);

        let (mut remote, _stat) = session.scp_recv(Path::new(src))?;
        let mut local = File::create(dst)?;
        io::copy(&mut remote, &mut local)?;

        remote.send_eof()?;
        remote.wait_eof()?;
        remote.close()?;
        remote.wait_close()?;
        Ok(())
    }
}

fn run_host_command(command: &str) -> Result<()> {
    debug!("[host] {}", command);
    let status = if cfg!(target_os = "windows") {
        Command::new("cmd").args(&["/C", command]).status()?
    } else {
        Command::new("sh").args(&["-c", command]).status()?
    };
    if !status.success() {
        return Err(Error::Transport(format!("`{}` failed: {}", command, status)));
    }
    Ok(())
}
