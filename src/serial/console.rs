//! A device console over a serial line, driven by matching what the device
//! prints.

use std::{
    io::{self, Read, Write},
    thread,
    time::{Duration, Instant},
};

use hexplay::HexViewBuilder;
use log::{debug, log_enabled, trace, Level::Trace};
use regex::Regex;

use super::ports::open_and_setup_port;
use crate::{
    configure::ConfigTarget,
    dialog::Dialog,
    error::{Error, Result},
    logging::redact,
    staging::quote,
    Settings,
};

/// Printed after every shell command with its exit status appended.
const STATUS_MARKER: &str = "IOTFLASH_RC=";

/// Anything the console can talk through.
pub trait Port: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Port for T {}

/// What the device printed that the workflow reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleSignal {
    Login,
    Password,
    Resetting,
    /// A shell or boot loader prompt.
    Prompt,
    Ok,
    Error,
}

impl ConsoleSignal {
    pub fn pattern(self) -> &'static str {
        match self {
            ConsoleSignal::Login => "login:",
            ConsoleSignal::Password => "Password:",
            ConsoleSignal::Resetting => "resetting",
            ConsoleSignal::Prompt => "#",
            ConsoleSignal::Ok => "OK",
            ConsoleSignal::Error => "ERROR",
        }
    }

    /// AT verdicts only count as whole lines: the firmware echoes the
    /// command, and an SSID may well contain `OK`.
    fn whole_line(self) -> bool {
        matches!(self, ConsoleSignal::Ok | ConsoleSignal::Error)
    }

    fn find_in(self, text: &str) -> Option<usize> {
        let pattern = self.pattern();
        text.match_indices(pattern).map(|(at, _)| at).find(|&at| {
            if !self.whole_line() {
                return true;
            }
            let starts = at == 0 || text[..at].ends_with('\n');
            let ends = text[at + pattern.len()..].starts_with(|c: char| c == '\r' || c == '\n');
            starts && ends
        })
    }
}

/// The earliest of `signals` appearing in `text`, with the byte offset just
/// past its pattern.
pub fn classify(text: &str, signals: &[ConsoleSignal]) -> Option<(ConsoleSignal, usize)> {
    signals
        .iter()
        .filter_map(|signal| {
            signal
                .find_in(text)
                .map(|at| (at, *signal, at + signal.pattern().len()))
        })
        .min_by_key(|(at, _, _)| *at)
        .map(|(_, signal, end)| (signal, end))
}

/// The exit status reported by the marker line, with the byte offset just
/// past that line.
fn exit_status(status: &Regex, text: &str) -> Option<(i32, usize)> {
    let caps = status.captures(text)?;
    let code = caps[1].parse().ok()?;
    Some((code, caps.get(0)?.end()))
}

/// What a shell printed for `command`, without the terminal's echo of it
/// nor the status marker.
fn command_output(output: &str, command: &str) -> String {
    let sent: Vec<&str> = command
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    output
        .lines()
        .map(|line| line.trim().trim_start_matches("> "))
        .filter(|line| !line.is_empty() && !line.contains(STATUS_MARKER))
        .filter(|line| !sent.iter().any(|s| line.ends_with(s)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct SerialConsole {
    port: Box<dyn Port>,
    name: String,
    pending: String,
}

impl SerialConsole {
    pub fn open(settings: &Settings, path: &str) -> Result<Self> {
        let port = open_and_setup_port(settings, path)?;
        Ok(SerialConsole::from_port(Box::new(port), path))
    }

    pub fn from_port(port: Box<dyn Port>, name: &str) -> Self {
        SerialConsole {
            port,
            name: name.to_owned(),
            pending: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&mut self, text: &str) -> Result<()> {
        debug!("[{}] <- {:?}", self.name, redact(text));
        self.port.write_all(text.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    pub fn send_line(&mut self, line: &str) -> Result<()> {
        self.send(&format!("{}\n", line))
    }

    /// Wait until one of `signals` is printed.
    pub fn wait_for(&mut self, signals: &[ConsoleSignal], timeout: Duration) -> Result<ConsoleSignal> {
        let what = signals
            .iter()
            .map(|s| format!("`{}`", s.pattern()))
            .collect::<Vec<_>>()
            .join(" or ");
        let (signal, _) = self.read_until(&what, timeout, |text| classify(text, signals))?;
        debug!("[{}] matched {:?}", self.name, signal);
        Ok(signal)
    }

    /// Wait for one of `signals` for as long as the operator wants: after
    /// every `timeout` they are asked whether to keep waiting. The device may
    /// need someone to press a button or plug a cable.
    pub fn wait_for_operator(
        &mut self,
        signals: &[ConsoleSignal],
        timeout: Duration,
        dialog: &mut dyn Dialog,
        what: &str,
    ) -> Result<ConsoleSignal> {
        loop {
            match self.wait_for(signals, timeout) {
                Err(Error::Timeout { .. }) => {
                    if !dialog.confirm(&format!("Still waiting for {}. Keep waiting?", what), true)? {
                        return Err(Error::Timeout {
                            what: what.to_owned(),
                            secs: timeout.as_secs(),
                        });
                    }
                }
                other => return other,
            }
        }
    }

    /// Run a shell command and return what it printed. The shell reports the
    /// command's exit status on a marker line; a non-zero status is an
    /// [`Error::Remote`] carrying the output.
    pub fn exec(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let status = Regex::new(&format!(r"{}(\d+)\r?\n", STATUS_MARKER))
            .map_err(|e| Error::Other(e.to_string()))?;
        self.send(&format!("{}\necho {}$?\n", command, STATUS_MARKER))?;
        let (code, output) = self.read_until(STATUS_MARKER, timeout, |text| exit_status(&status, text))?;
        // The prompt printed after the marker; a `#` in the echo does not count.
        self.wait_for(&[ConsoleSignal::Prompt], timeout)?;

        let output = command_output(&output, command);
        if code != 0 {
            debug!("[{}] exit status {}", self.name, code);
            return Err(Error::Remote {
                command: redact(command.lines().next().unwrap_or_default()),
                stderr: output,
            });
        }
        Ok(output)
    }

    /// Send an AT command and wait for its verdict.
    pub fn at(&mut self, command: &str, timeout: Duration) -> Result<()> {
        self.send(&format!("{}\r\n", command))?;
        match self.wait_for(&[ConsoleSignal::Ok, ConsoleSignal::Error], timeout)? {
            ConsoleSignal::Ok => Ok(()),
            _ => Err(Error::Remote {
                command: redact(command),
                stderr: "ERROR".to_owned(),
            }),
        }
    }

    /// Read until `find` locates what we wait for in the pending text,
    /// consuming the text up to the offset it returns.
    fn read_until<T>(
        &mut self,
        what: &str,
        timeout: Duration,
        mut find: impl FnMut(&str) -> Option<(T, usize)>,
    ) -> Result<(T, String)> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            if let Some((found, end)) = find(&self.pending) {
                let consumed: String = self.pending.drain(..end).collect();
                return Ok((found, consumed));
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    what: what.to_owned(),
                    secs: timeout.as_secs(),
                });
            }
            match self.port.read(&mut chunk) {
                Ok(0) => thread::sleep(Duration::from_millis(10)),
                Ok(n) => {
                    if log_enabled!(Trace) {
                        let view = HexViewBuilder::new(&chunk[..n])
                            .address_offset(0)
                            .row_width(16)
                            .finish();
                        trace!("[{}] ->\n{}", self.name, view);
                    }
                    self.pending.push_str(&String::from_utf8_lossy(&chunk[..n]));
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Timeout for commands run through a device shell.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration written through a logged-in device shell.
pub struct ShellTarget<'a> {
    console: &'a mut SerialConsole,
}

impl<'a> ShellTarget<'a> {
    pub fn new(console: &'a mut SerialConsole) -> Self {
        ShellTarget { console }
    }

    fn redirect(&mut self, path: &str, content: &str, operator: &str) -> Result<()> {
        let dir = path.rsplitn(2, '/').nth(1).filter(|d| !d.is_empty()).unwrap_or("/");
        let mut script = format!(
            "mkdir -p {} && cat {} {} <<'IOTFLASH_EOF'\n",
            quote(dir),
            operator,
            quote(path)
        );
        script.push_str(content);
        script.push_str("IOTFLASH_EOF");
        self.console.exec(&script, SHELL_TIMEOUT).map(drop)
    }
}

impl ConfigTarget for ShellTarget<'_> {
    fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.redirect(path, content, ">")
    }

    fn append_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.redirect(path, content, ">>")
    }

    fn run(&mut self, command: &str) -> Result<String> {
        self.console.exec(command, SHELL_TIMEOUT)
    }
}

/// Configuration sent as AT commands to modem-style firmware.
pub struct AtTarget<'a> {
    console: &'a mut SerialConsole,
}

impl<'a> AtTarget<'a> {
    pub fn new(console: &'a mut SerialConsole) -> Self {
        AtTarget { console }
    }
}

impl ConfigTarget for AtTarget<'_> {
    fn write_file(&mut self, path: &str, _: &str) -> Result<()> {
        Err(Error::Other(format!("cannot write {}: AT firmware has no file system", path)))
    }

    fn append_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.write_file(path, content)
    }

    fn run(&mut self, command: &str) -> Result<String> {
        // Joining an access point takes a while.
        self.console.at(command, Duration::from_secs(20))?;
        Ok(String::new())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
