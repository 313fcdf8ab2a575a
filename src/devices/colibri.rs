//! Toradex Colibri modules. The vendor archive is not a disk image but a
//! tree with an `update.sh` script; it is turned into a FAT update image in
//! staging, written to an SD card, and installed from the U-Boot console.

use std::time::Duration;

use log::info;

use super::{connect_console, copy_out, opened, write_image};
use crate::{
    error::{Error, Result},
    flasher::{staged, Configurer, FlashContext, Writer},
    image::EXTRACT_TIMEOUT,
    job,
    serial::{ConsoleSignal, SHELL_TIMEOUT},
    staging::{quote, StagingSession},
};

/// Name of the FAT image holding the update files, in the work directory.
pub const UPDATE_IMAGE: &str = "colibri-update.img";

/// Slack added to the update files so the FAT image never runs out of room.
const FAT_OVERHEAD_MB: u64 = 64;

/// Writing the eMMC takes several minutes.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const BOOT_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Size in MiB of the FAT image holding `content_mb` of update files.
pub fn update_image_size(content_mb: u64) -> u64 {
    content_mb + FAT_OVERHEAD_MB
}

/// Build the update image from the extracted vendor tree.
pub struct ColibriRebuild;

impl Configurer for ColibriRebuild {
    fn configure(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        let session = staged(&mut ctx.staging)?;
        job::run_with_spinner("Building the update image", |handle| {
            handle.active(true);
            rebuild(session)
        })?;
        println!("[+] Update image built");
        Ok(())
    }
}

/// Write the update image to an SD card, then drive the installation from
/// the module's serial console.
pub struct ColibriWrite;

impl Writer for ColibriWrite {
    fn write(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        let image = copy_out(ctx)?;
        write_image(ctx, &image)?;
        println!(
            "[+] Insert the SD card in the carrier board, connect its serial console \
             and power it on. Stop the autoboot with any key."
        );
        run_update(ctx)
    }
}

fn rebuild(session: &mut StagingSession) -> Result<()> {
    let folder = session
        .folder
        .clone()
        .ok_or_else(|| Error::Other("the image has no vendor tree to build from".into()))?;
    let tree = session.remote_path(&folder);
    let update = session.remote_path("update");
    let image = session.remote_path(UPDATE_IMAGE);

    session.exec(&format!("rm -rf {} {}", quote(&update), quote(&image)))?;
    session.exec_with_timeout(
        &format!("cd {} && ./update.sh -o {} 2>&1", quote(&tree), quote(&update)),
        EXTRACT_TIMEOUT,
    )?;

    let du = session.exec(&format!("du -sm {} | cut -f1", quote(&update)))?;
    let content_mb: u64 = du
        .trim()
        .parse()
        .map_err(|_| Error::Other(format!("unexpected size of {}: {:?}", update, du)))?;
    let size_mb = update_image_size(content_mb);
    info!("{} MiB of update files, {} MiB image", content_mb, size_mb);

    session.exec(&format!("mkfs.vfat -C {} {} 2>&1", quote(&image), size_mb * 1024))?;
    session.exec(&format!("mcopy -s -i {} {}/* ::/ 2>&1", quote(&image), quote(&update)))?;
    session.image = Some(UPDATE_IMAGE.to_owned());
    Ok(())
}

fn run_update(ctx: &mut FlashContext<'_>) -> Result<()> {
    connect_console(ctx)?;
    let console = opened(&mut ctx.console)?;

    console.send_line("")?;
    console.wait_for_operator(&[ConsoleSignal::Prompt], SHELL_TIMEOUT, ctx.dialog, "the U-Boot prompt")?;
    console.send_line("run setupdate")?;
    console.wait_for(&[ConsoleSignal::Prompt], SHELL_TIMEOUT)?;

    println!("[+] Installing the update, the module resets when it is done");
    console.send_line("run update")?;
    console.wait_for_operator(
        &[ConsoleSignal::Resetting],
        UPDATE_TIMEOUT,
        ctx.dialog,
        "the update to finish",
    )?;
    console.wait_for_operator(&[ConsoleSignal::Login], BOOT_TIMEOUT, ctx.dialog, "the first boot")?;
    info!("Colibri update installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        serial::SerialConsole,
        staging::CommandOutput,
        testing::{FakePort, Fixture},
        SettingsBuilder,
    };

    #[test]
    fn update_image_has_room_to_spare() {
        assert_eq!(update_image_size(0), 64);
        assert_eq!(update_image_size(180), 244);
    }

    #[test]
    fn update_image_is_built_from_the_vendor_tree() {
        let mut fixture = Fixture::new("colibri");
        fixture.backend.respond("du -sm", CommandOutput::stdout("180\n"));
        let mut ctx = fixture.context();
        ctx.session().unwrap().folder = Some("Colibri_iMX6_LinuxImageV2.8".into());
        ColibriRebuild.configure(&mut ctx).unwrap();
        assert_eq!(ctx.session().unwrap().image.as_deref(), Some(UPDATE_IMAGE));
        drop(ctx);

        let backend = &fixture.backend;
        assert!(backend.ran("cd /w/Colibri_iMX6_LinuxImageV2.8 && ./update.sh -o /w/update"));
        assert!(backend.ran("mkfs.vfat -C /w/colibri-update.img 249856"));
        assert!(backend.ran("mcopy -s -i /w/colibri-update.img /w/update/* ::/"));
    }

    #[test]
    fn rebuild_needs_the_vendor_tree() {
        let mut fixture = Fixture::new("colibri");
        let mut ctx = fixture.context();
        assert!(ColibriRebuild.configure(&mut ctx).is_err());
        drop(ctx);
        assert!(!fixture.backend.ran("update.sh"));
    }

    #[test]
    fn garbage_size_is_an_error() {
        let mut fixture = Fixture::new("colibri");
        fixture.backend.respond("du -sm", CommandOutput::stdout("du: no such file"));
        let mut ctx = fixture.context();
        ctx.session().unwrap().folder = Some("tree".into());
        assert!(ColibriRebuild.configure(&mut ctx).is_err());
        drop(ctx);
        assert!(!fixture.backend.ran("mkfs.vfat"));
    }

    #[test]
    fn sd_card_is_written_then_update_installed() {
        let port = FakePort::new("U-Boot 2016.11\r\nColibri iMX6 # ");
        port.reply("run setupdate", "Colibri iMX6 # ");
        port.reply(
            "run update",
            "Writing...\r\nresetting ...\r\n\r\ncolibri-imx6 login: ",
        );

        let mut fixture =
            Fixture::with_settings("colibri", SettingsBuilder::new().quiet(true).finalize());
        let mut ctx = fixture.context();
        ctx.session().unwrap().image = Some(UPDATE_IMAGE.into());
        ctx.console = Some(SerialConsole::from_port(Box::new(port.clone()), "fake"));
        ColibriWrite.write(&mut ctx).unwrap();
        drop(ctx);

        assert_eq!(fixture.workstation.writes().len(), 1);
        let written = port.written();
        let setup = written.find("run setupdate\n").unwrap();
        let update = written.find("run update\n").unwrap();
        assert!(setup < update);
        assert_eq!(fixture.dialog.asked(), 0);
    }
}
