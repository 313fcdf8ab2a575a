//! Boards booting from an SD card: the image is extracted and edited in the
//! staging environment, then copied back and written to a removable disk.

use std::{fs, path::PathBuf, thread};

use console::style;
use log::{info, warn};

use super::{collect, write_image};
use crate::{
    configure::{AddressProbe, Configurator, MountedRoot},
    dialog::Dialog,
    error::{Error, Result},
    flasher::{staged, Configurer, FlashContext, Preparer, Writer},
    image::ImagePreparer,
    job,
    mount::PartitionMounter,
    staging::{MountState, StagingSession},
    Settings,
};

/// Start the staging environment while the image is being resolved (which
/// may mean a long download), then upload and extract it there.
pub struct StagedPrepare;

impl Preparer for StagedPrepare {
    fn prepare(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        let preparer = ImagePreparer::new(ctx.image_source(), ctx.fetcher);
        let session = staged(&mut ctx.staging)?;

        let running = session.is_running();
        let (started, resolved) = thread::scope(|scope| {
            let starting = if running {
                None
            } else {
                let session = &mut *session;
                Some(scope.spawn(move || session.start()))
            };
            let resolved = preparer.resolve();
            let started = match starting {
                Some(handle) => handle.join().unwrap_or(Err(Error::JobAbandoned)),
                None => Ok(()),
            };
            (started, resolved)
        });
        started?;
        let resolved = resolved?;
        info!("Image resolved: {}", resolved.1.display());

        preparer.prepare_resolved(session, resolved)?;
        match session.image_path() {
            Some(image) => {
                println!("[+] Image ready in staging: {}", style(image).cyan());
                Ok(())
            }
            None => Err(Error::ImageNotFound),
        }
    }
}

/// Mount the root partition, collect and write the configuration into it,
/// and unmount whatever happened.
pub struct MountConfigure;

impl Configurer for MountConfigure {
    fn configure(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        let partition = ctx.profile.partition.clone();
        let session = staged(&mut ctx.staging)?;
        PartitionMounter::new(session).mount(partition.as_deref())?;
        if session.mount == MountState::Unattached {
            warn!("no root partition to configure, the image is written as is");
            return Ok(());
        }

        let outcome = edit_mounted(
            &mut ctx.configurator,
            ctx.dialog,
            ctx.probe,
            ctx.settings,
            &ctx.profile.name,
            session,
        );
        let unmounted = PartitionMounter::new(session).unmount();
        outcome.and(unmounted)
    }
}

/// Copy the edited image out of staging and raw-write it.
pub struct DiskWrite;

impl Writer for DiskWrite {
    fn write(&self, ctx: &mut FlashContext<'_>) -> Result<()> {
        let image = copy_out(ctx)?;
        write_image(ctx, &image).map(drop)
    }
}

/// Download the staged image to `<work dir>/out`, where it is written from.
pub fn copy_out(ctx: &mut FlashContext<'_>) -> Result<PathBuf> {
    let out_dir = ctx.work_dir().join("out");
    let session = staged(&mut ctx.staging)?;
    let remote = session.image_path().ok_or(Error::ImageNotFound)?;
    let name = remote.rsplit('/').next().unwrap_or(&remote).to_owned();
    let local = out_dir.join(&name);

    fs::create_dir_all(&out_dir)?;
    job::run_with_spinner(&format!("Copying {} from staging", name), |handle| {
        handle.active(true);
        session.download(&remote, &local)
    })?;
    ctx.local_image = Some(local.clone());
    Ok(local)
}

fn edit_mounted(
    configurator: &mut Configurator,
    dialog: &mut dyn Dialog,
    probe: &dyn AddressProbe,
    settings: &Settings,
    device: &str,
    session: &mut StagingSession,
) -> Result<()> {
    if collect(configurator, dialog, probe, settings, device)? {
        configurator.write(&mut MountedRoot::new(session))?;
        println!("[+] Configuration written to the image");
    }
    Ok(())
}
