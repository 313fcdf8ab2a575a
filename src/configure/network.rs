//! Static network interface answers and their validation.

use std::{
    net::Ipv4Addr,
    process::{Command, Stdio},
};

use console::style;
use log::debug;

use crate::{
    dialog::Dialog,
    error::{Error, Result},
};

/// Invalid answers tolerated before giving up.
pub const MAX_INPUT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub name: String,
    pub address: String,
    pub netmask: String,
    pub gateway: String,
    pub dns: String,
    pub network: Option<String>,
}

impl InterfaceConfig {
    /// The `interfaces(5)` stanza for this interface.
    pub fn render(&self) -> String {
        let mut stanza = format!(
            "auto {name}\niface {name} inet static\n    address {}\n    netmask {}\n    gateway {}\n",
            self.address,
            self.netmask,
            self.gateway,
            name = self.name
        );
        if let Some(network) = &self.network {
            stanza.push_str(&format!("    network {}\n", network));
        }
        stanza.push_str(&format!("    dns-nameservers {}\n", self.dns));
        stanza
    }
}

/// Tells whether an address already answers on the network.
pub trait AddressProbe {
    fn is_alive(&self, address: &str) -> bool;
}

/// Probes with the system `ping`, one echo request.
pub struct PingProbe;

impl AddressProbe for PingProbe {
    fn is_alive(&self, address: &str) -> bool {
        let mut ping = Command::new("ping");
        if cfg!(target_os = "windows") {
            ping.args(&["-n", "1", "-w", "1000"]);
        } else if cfg!(target_os = "macos") {
            ping.args(&["-c", "1", "-t", "1"]);
        } else {
            ping.args(&["-c", "1", "-W", "1"]);
        }
        let status = ping
            .arg(address)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("cannot run ping: {}", e);
                false
            }
        }
    }
}

pub fn is_ipv4(value: &str) -> bool {
    value.parse::<Ipv4Addr>().is_ok()
}

/// Ask for an IPv4 address until a well-formed one is given.
pub fn ask_ipv4(dialog: &mut dyn Dialog, prompt: &str, default: Option<&str>) -> Result<String> {
    for _ in 0..MAX_INPUT_ATTEMPTS {
        let answer = dialog.input(prompt, default)?;
        if is_ipv4(&answer) {
            return Ok(answer);
        }
        println!("{}", style(format!("[-] `{}` is not a valid IPv4 address", answer)).yellow());
    }
    Err(Error::RetriesExhausted {
        what: prompt.to_owned(),
        attempts: MAX_INPUT_ATTEMPTS,
    })
}

/// Ask for an address nobody on the network uses yet. Malformed and taken
/// addresses share the same attempt budget.
pub fn ask_free_address(
    dialog: &mut dyn Dialog,
    probe: &dyn AddressProbe,
    prompt: &str,
) -> Result<String> {
    for _ in 0..MAX_INPUT_ATTEMPTS {
        let answer = dialog.input(prompt, None)?;
        if !is_ipv4(&answer) {
            println!("{}", style(format!("[-] `{}` is not a valid IPv4 address", answer)).yellow());
            continue;
        }
        if probe.is_alive(&answer) {
            println!("{}", style(format!("[-] {} is already in use", answer)).yellow());
            continue;
        }
        return Ok(answer);
    }
    Err(Error::RetriesExhausted {
        what: prompt.to_owned(),
        attempts: MAX_INPUT_ATTEMPTS,
    })
}
