//! Stages for devices flashed straight from the host, over USB or a serial
//! line, without a staging environment.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use log::{info, warn};
use zip::ZipArchive;

use super::collect;
use crate::{
    error::{Error, Result},
    flasher::{Configurer, FlashContext, Preparer},
    image::resolve_image_source,
    job,
    serial::{resolve_port, SerialConsole},
};

/// Attempts at opening the device's serial port.
pub const MAX_PORT_ATTEMPTS: u32 = 3;

/// Ask the operator to connect the device, then get the image on the host,
/// unpacking it when it is a vendor flashing tree.
pub struct LocalPrepare {
    pub unpack: bool,
}

impl Preparer for LocalPrepare {
    fn prepare(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        if !ctx.settings.quiet {
            let prompt = format!(
                "Connect your {} to this computer. Ready to continue?",
                ctx.profile.name
            );
            if !ctx.dialog.confirm(&prompt, true)? {
                return Err(Error::Declined);
            }
        }

        let (_, path) = resolve_image_source(&ctx.image_source(), ctx.fetcher)?;
        let local = if self.unpack {
            unpack(&path, &ctx.work_dir())?
        } else {
            path
        };
        info!("Image ready at {}", local.display());
        ctx.local_image = Some(local);
        Ok(())
    }
}

/// Collect the configuration now; it is applied on the live device once
/// the image is written.
pub struct CollectConfig;

impl Configurer for CollectConfig {
    fn configure(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        collect(
            &mut ctx.configurator,
            ctx.dialog,
            ctx.probe,
            ctx.settings,
            &ctx.profile.name,
        )
        .map(drop)
    }
}

/// Unpack the zip at `archive` into a directory of `work_dir` named after
/// it. An already populated directory is reused.
pub fn unpack(archive: &Path, work_dir: &Path) -> Result<PathBuf> {
    let stem = archive
        .file_stem()
        .ok_or_else(|| Error::InvalidImageLocation(archive.display().to_string()))?;
    let dest = work_dir.join(stem);
    if dest.is_dir() && fs::read_dir(&dest)?.next().is_some() {
        info!("{} is already unpacked", archive.display());
        return Ok(dest);
    }

    job::run_with_spinner("Unpacking image", |handle| {
        handle.active(true);
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        zip.extract(&dest)?;
        Ok(())
    })?;
    Ok(dest)
}

/// The device's serial port, resolved once per run.
pub fn ensure_port(ctx: &mut FlashContext<'_>) -> Result<String> {
    if let Some(port) = &ctx.port {
        return Ok(port.clone());
    }
    let port = resolve_port(ctx.settings, ctx.dialog)?;
    ctx.port = Some(port.clone());
    Ok(port)
}

/// Open the run's serial console unless it already is. The operator gets
/// [`MAX_PORT_ATTEMPTS`] tries, reconnecting the device in between.
pub fn connect_console(ctx: &mut FlashContext<'_>) -> Result<()> {
    if ctx.console.is_some() {
        return Ok(());
    }
    for attempt in 1..=MAX_PORT_ATTEMPTS {
        let port = ensure_port(ctx)?;
        match SerialConsole::open(ctx.settings, &port) {
            Ok(console) => {
                ctx.console = Some(console);
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "cannot open {} ({}/{}): {}",
                    port, attempt, MAX_PORT_ATTEMPTS, e
                );
                ctx.port = None;
                if attempt < MAX_PORT_ATTEMPTS {
                    let prompt = format!("Cannot open {}. Reconnect the device and retry?", port);
                    if !ctx.dialog.confirm(&prompt, true)? {
                        return Err(Error::Declined);
                    }
                }
            }
        }
    }
    Err(Error::RetriesExhausted {
        what: "opening the serial port".into(),
        attempts: MAX_PORT_ATTEMPTS,
    })
}

/// The run's open console. Takes the field rather than the context so other
/// fields stay usable.
pub fn opened(console: &mut Option<SerialConsole>) -> Result<&mut SerialConsole> {
    console
        .as_mut()
        .ok_or_else(|| Error::Transport("the serial console is not open".into()))
}
