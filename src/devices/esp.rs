//! Espressif modules running the AT firmware. The firmware is written with
//! `esptool`, then Wi-Fi is joined with AT commands over the same port.

use std::time::Duration;

use log::{debug, info};
use retry::{delay, retry};

use super::{connect_console, ensure_port, opened};
use crate::{
    error::{Error, Result},
    flasher::{FlashContext, Writer},
    job,
    serial::AtTarget,
};

pub const ESPTOOL: &str = "esptool.py";

const FLASH_BAUD: &str = "460800";

/// The module resets after flashing; it answers `AT` once it has booted.
const AT_ATTEMPTS: usize = 10;
const AT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip {
    Esp32,
    Esp8266,
}

impl Chip {
    pub fn name(self) -> &'static str {
        match self {
            Chip::Esp32 => "esp32",
            Chip::Esp8266 => "esp8266",
        }
    }

    /// Flash offset of a factory image.
    pub fn offset(self) -> &'static str {
        match self {
            Chip::Esp32 => "0x1000",
            Chip::Esp8266 => "0x0",
        }
    }
}

pub fn esptool_args(chip: Chip, port: &str, firmware: &str) -> Vec<String> {
    vec![
        "--chip".into(),
        chip.name().into(),
        "--port".into(),
        port.into(),
        "--baud".into(),
        FLASH_BAUD.into(),
        "write_flash".into(),
        "-z".into(),
        chip.offset().into(),
        firmware.into(),
    ]
}

pub struct EspWrite {
    pub chip: Chip,
}

impl Writer for EspWrite {
    fn write(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        let firmware = ctx.local_image()?.to_string_lossy().into_owned();
        let port = ensure_port(ctx)?;
        let args = esptool_args(self.chip, &port, &firmware);

        let workstation = ctx.workstation;
        job::run_with_spinner(&format!("Flashing the {}", self.chip.name()), |handle| {
            handle.active(true);
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let output = workstation.run_tool(ESPTOOL, &args)?;
            debug!("{}", output.trim());
            Ok(())
        })?;
        println!("[+] Firmware written to {}", port);

        if ctx.configurator.store().is_empty() {
            return Ok(());
        }
        connect_console(ctx)?;
        let console = opened(&mut ctx.console)?;
        let result = retry(delay::Fixed::from_millis(500).take(AT_ATTEMPTS - 1), || {
            console.at("AT", AT_TIMEOUT)
        });
        match result {
            Ok(()) => {}
            Err(retry::Error::Operation { tries, .. }) => {
                return Err(Error::RetriesExhausted {
                    what: "waiting for the AT firmware".into(),
                    attempts: tries as u32,
                })
            }
            Err(retry::Error::Internal(msg)) => return Err(Error::Transport(msg)),
        }
        info!("AT firmware is up");

        ctx.configurator.write(&mut AtTarget::new(console))
    }
}
