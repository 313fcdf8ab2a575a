//! Intel Edison. The vendor tree is flashed over USB with its own
//! `flashall` script; the board is then configured through its serial
//! console once it has booted.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::info;

use super::{connect_console, opened};
use crate::{
    error::{Error, Result},
    flasher::{FlashContext, Writer},
    job,
    serial::{ConsoleSignal, ShellTarget, SHELL_TIMEOUT},
};

#[cfg(windows)]
const FLASH_SCRIPT: &str = "flashall.bat";
#[cfg(not(windows))]
const FLASH_SCRIPT: &str = "flashall.sh";

const BOOT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// The flashing script of an unpacked vendor tree, at its top or one level
/// down.
pub fn flash_script(tree: &Path) -> Result<PathBuf> {
    let top = tree.join(FLASH_SCRIPT);
    if top.is_file() {
        return Ok(top);
    }
    for entry in fs::read_dir(tree)? {
        let nested = entry?.path().join(FLASH_SCRIPT);
        if nested.is_file() {
            return Ok(nested);
        }
    }
    Err(Error::Other(format!(
        "no {} in {}",
        FLASH_SCRIPT,
        tree.display()
    )))
}

pub struct EdisonWrite;

impl Writer for EdisonWrite {
    fn write(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        let script = flash_script(&ctx.local_image()?)?;
        let script = script.to_string_lossy().into_owned();
        println!("[+] Keep the Edison plugged in, it reboots several times while flashing");

        let workstation = ctx.workstation;
        job::run_with_spinner("Flashing the Edison", |handle| {
            handle.active(true);
            let output = if cfg!(windows) {
                workstation.run_tool(&script, &[])?
            } else {
                workstation.run_tool("sh", &[script.as_str()])?
            };
            info!("{}", output.trim());
            Ok(())
        })?;
        println!("[+] Edison flashed, waiting for it to boot");

        log_in_and_configure(ctx)
    }
}

fn log_in_and_configure(ctx: &mut FlashContext<'_>) -> Result<()> {
    connect_console(ctx)?;
    let user = ctx.image.user.clone();
    let password = ctx.image.password.clone();
    let console = opened(&mut ctx.console)?;

    console.send_line("")?;
    console.wait_for_operator(&[ConsoleSignal::Login], BOOT_TIMEOUT, ctx.dialog, "the login prompt")?;
    console.send_line(&user)?;
    let signal = console.wait_for(&[ConsoleSignal::Password, ConsoleSignal::Prompt], SHELL_TIMEOUT)?;
    if signal == ConsoleSignal::Password {
        console.send_line(&password)?;
        console.wait_for(&[ConsoleSignal::Prompt], SHELL_TIMEOUT)?;
    }
    info!("Logged in as {}", user);

    ctx.configurator.write(&mut ShellTarget::new(console))
}
