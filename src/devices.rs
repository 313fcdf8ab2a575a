//! Device families: which strategy each flashing stage uses for a device,
//! and the pieces those strategies share.
//!
//! | family    | prepare          | configure          | write                      |
//! |-----------|------------------|--------------------|----------------------------|
//! | `sd`      | staged           | mount + configure  | copy out + raw disk write  |
//! | `colibri` | staged           | update image build | raw disk write + U-Boot    |
//! | `edison`  | local, unpacked  | collect answers    | `flashall` + console shell |
//! | `esp32`   | local            | collect Wi-Fi      | `esptool` + AT commands    |
//! | `esp8266` | local            | collect Wi-Fi      | `esptool` + AT commands    |
//!
//! Every family finishes with [`Report`].

mod colibri;
mod edison;
mod esp;
mod local;
mod sd;

use std::path::Path;

use console::style;
use log::{info, warn};

pub use colibri::{update_image_size, ColibriRebuild, ColibriWrite, UPDATE_IMAGE};
pub use edison::{flash_script, EdisonWrite};
pub use esp::{esptool_args, Chip, EspWrite, ESPTOOL};
pub use local::{connect_console, ensure_port, opened, unpack, CollectConfig, LocalPrepare};
pub use sd::{copy_out, DiskWrite, MountConfigure, StagedPrepare};

use crate::{
    configure::{apply_wifi_at, AddressProbe, ConfigOption, Configurator},
    dialog::Dialog,
    error::{Error, Result},
    flasher::{FlashContext, Finisher, Flasher},
    job,
    manifest::{DeviceProfile, Family, ImageEntry},
    workstation::{select_disk, Disk},
    Settings,
};

// =============================================================================
// Public Interface
// =============================================================================

/// The flasher composition for `profile`'s family.
pub fn factory(profile: &DeviceProfile) -> Flasher {
    match profile.family {
        Family::Sd => Flasher::new(
            "sd",
            Box::new(StagedPrepare),
            Box::new(MountConfigure),
            Box::new(DiskWrite),
            Box::new(Report),
        ),
        Family::Colibri => Flasher::new(
            "colibri",
            Box::new(StagedPrepare),
            Box::new(ColibriRebuild),
            Box::new(ColibriWrite),
            Box::new(Report),
        ),
        Family::Edison => Flasher::new(
            "edison",
            Box::new(LocalPrepare { unpack: true }),
            Box::new(CollectConfig),
            Box::new(EdisonWrite),
            Box::new(Report),
        ),
        Family::Esp32 | Family::Esp8266 => {
            let chip = if profile.family == Family::Esp32 {
                Chip::Esp32
            } else {
                Chip::Esp8266
            };
            Flasher::new(
                chip.name(),
                Box::new(LocalPrepare { unpack: false }),
                Box::new(CollectConfig),
                Box::new(EspWrite { chip }),
                Box::new(Report),
            )
        }
    }
}

/// The configuration steps offered for a family.
pub fn configurator(family: Family) -> Configurator {
    match family {
        Family::Sd => Configurator::new(),
        // The update image is rebuilt from the vendor tree, nothing to edit.
        Family::Colibri => Configurator::new().only(&[]),
        Family::Edison => {
            Configurator::new().only(&[ConfigOption::Wifi, ConfigOption::Interface, ConfigOption::Dns])
        }
        Family::Esp32 | Family::Esp8266 => {
            let mut configurator = Configurator::new().only(&[ConfigOption::Wifi]);
            configurator.set_apply(ConfigOption::Wifi, Some(apply_wifi_at));
            configurator
        }
    }
}

/// Families whose image is prepared in the staging environment.
pub fn needs_staging(family: Family) -> bool {
    matches!(family, Family::Sd | Family::Colibri)
}

/// The login hint printed once a device is ready.
pub fn credentials(image: &ImageEntry) -> Option<String> {
    if image.user.is_empty() {
        return None;
    }
    let password = if image.password.is_empty() {
        "no password".to_owned()
    } else {
        format!("password `{}`", image.password)
    };
    Some(format!("Log in as `{}` with {}", image.user, password))
}

/// The `Done` stage of every family: print how to log in, close the serial
/// console and stop the staging environment (silently in quiet mode, after
/// asking otherwise).
pub struct Report;

impl Finisher for Report {
    fn finish(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        println!("[+] 🎉 Your {} is ready", style(&ctx.profile.name).green());
        if let Some(hint) = credentials(&ctx.image) {
            println!("[+] {}", hint);
        }
        ctx.console = None;

        if let Some(session) = ctx.staging.as_mut() {
            if session.is_running()
                && (ctx.settings.quiet
                    || ctx.dialog.confirm("Stop the staging environment?", true)?)
            {
                session.stop()?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Crate-Public helpers shared by the families
// =============================================================================

/// Run the config half of `configurator` unless the run is quiet (and not
/// forced). Returns whether the operator went through it.
pub(crate) fn collect(
    configurator: &mut Configurator,
    dialog: &mut dyn Dialog,
    probe: &dyn AddressProbe,
    settings: &Settings,
    device: &str,
) -> Result<bool> {
    if settings.quiet && !settings.force_configure {
        info!("Quiet run, configuration skipped");
        return Ok(false);
    }
    configurator.setup(device, dialog, probe, settings.force_configure)
}

/// Raw-write `image` to the removable disk picked by the operator (or named
/// in the settings), confirming first unless the run is quiet.
pub(crate) fn write_image(ctx: &mut FlashContext<'_>, image: &Path) -> Result<Disk> {
    let workstation = ctx.workstation;
    let disk = select_disk(
        workstation,
        ctx.dialog,
        ctx.settings.disk.as_deref(),
        ctx.settings.quiet,
    )?;
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.display().to_string());

    if !ctx.settings.quiet {
        let prompt = format!(
            "Write {} to {}? Everything on the disk will be lost",
            name,
            disk.describe()
        );
        if !ctx.dialog.confirm(&prompt, false)? {
            return Err(Error::Declined);
        }
    }

    workstation.unmount(&disk)?;
    job::run_with_spinner(&format!("Writing {} to {}", name, disk.path), |handle| {
        handle.active(true);
        workstation.write_to_disk(image, &disk)
    })?;
    if let Err(e) = workstation.eject(&disk) {
        warn!("cannot eject {}: {}", disk.path, e);
    }
    println!(
        "[+] {} written to {}",
        style(&name).green(),
        style(&disk.path).cyan()
    );
    Ok(disk)
}

// =============================================================================
// Unit Tests
// =============================================================================
