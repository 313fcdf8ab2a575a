//! Everything a flashing run works with, owned or borrowed for its duration.

use std::path::PathBuf;

use crate::{
    config::image_cache_dir,
    configure::{AddressProbe, Configurator},
    dialog::Dialog,
    error::{Error, Result},
    image::ImageSource,
    manifest::{DeviceProfile, ImageEntry},
    repository::Fetcher,
    serial::SerialConsole,
    staging::StagingSession,
    workstation::WorkStation,
    Settings,
};

/// The state threaded through the stages of one run.
///
/// The staging session, the serial console and the configurator are owned
/// by the run: they are created for it and dropped with it. The host side
/// collaborators are borrowed.
pub struct FlashContext<'a> {
    pub settings: &'a Settings,
    pub profile: DeviceProfile,
    pub image: ImageEntry,
    /// Per-user cache directory.
    pub cache_dir: PathBuf,

    pub dialog: &'a mut dyn Dialog,
    pub workstation: &'a dyn WorkStation,
    pub fetcher: &'a dyn Fetcher,
    pub probe: &'a dyn AddressProbe,

    /// Only the families that edit their image in a sandbox have one.
    pub staging: Option<StagingSession>,
    pub configurator: Configurator,
    /// Host copy of what gets written: a raw image, a firmware file or an
    /// unpacked vendor flashing tree.
    pub local_image: Option<PathBuf>,
    /// Serial port of the device, once known.
    pub port: Option<String>,
    /// Opened on first use by the serial flows and closed when the run ends.
    pub console: Option<SerialConsole>,
}

impl<'a> FlashContext<'a> {
    /// `<cache>/images/<device>/<version>`.
    pub fn work_dir(&self) -> PathBuf {
        image_cache_dir(
            &self.cache_dir,
            &self.profile.name,
            self.image.version_or_default(),
        )
    }

    pub fn image_source(&self) -> ImageSource {
        ImageSource::parse(
            &self.image.url,
            &self.work_dir(),
            self.image.version_or_default(),
            self.image.checksum.clone(),
        )
    }

    pub fn session(&mut self) -> Result<&mut StagingSession> {
        staged(&mut self.staging)
    }

    pub fn local_image(&self) -> Result<PathBuf> {
        self.local_image.clone().ok_or(Error::ImageNotFound)
    }
}

/// The staging session of a run, for stages that cannot work without one.
/// Takes the field rather than the context so other fields stay usable.
pub fn staged(staging: &mut Option<StagingSession>) -> Result<&mut StagingSession> {
    staging
        .as_mut()
        .ok_or_else(|| Error::Other("this device needs a staging environment".into()))
}
