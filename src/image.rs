//! Image acquisition: resolve where the image comes from, get it into the
//! staging environment and extract the raw image out of its archive.
//!
//! Extraction of a corrupt download (`crc error`) discards both copies and
//! starts over from the download, at most [`MAX_EXTRACT_RETRIES`] times.

mod archive;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{info, warn};
use url::Url;

pub use archive::{
    folder_from_output, image_from_output, is_crc_error, scan_listing, single_zip_entry,
    ArchiveKind,
};

use crate::{
    error::{Error, Result},
    job,
    repository::{Fetcher, GenericRepository},
    staging::{quote, StagingSession},
};

/// How many times a corrupt archive is downloaded again.
pub const MAX_EXTRACT_RETRIES: u32 = 2;

/// Extraction of large images can take a long time.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

// =============================================================================
// Public Interface
// =============================================================================

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Local(PathBuf),
    Remote(GenericRepository),
}

impl ImageSource {
    /// Anything that is not a well-formed download URL is a local path.
    pub fn parse(location: &str, repo_dir: &Path, version: &str, checksum: Option<String>) -> Self {
        if is_url(location) {
            ImageSource::Remote(
                GenericRepository::new(location, version, repo_dir).with_checksum(checksum),
            )
        } else {
            ImageSource::Local(PathBuf::from(location))
        }
    }
}

pub fn is_url(location: &str) -> bool {
    Url::parse(location)
        .map(|url| matches!(url.scheme(), "http" | "https" | "ftp") && url.has_host())
        .unwrap_or(false)
}

/// Make the image available on the host, returning its file name and path.
pub fn resolve_image_source(source: &ImageSource, fetcher: &dyn Fetcher) -> Result<(String, PathBuf)> {
    match source {
        ImageSource::Local(path) => {
            if !path.is_file() {
                return Err(Error::InvalidImageLocation(path.display().to_string()));
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::InvalidImageLocation(path.display().to_string()))?;
            Ok((name, path.clone()))
        }
        ImageSource::Remote(repo) => {
            let path = fetcher.fetch(repo)?;
            Ok((repo.name().to_owned(), path))
        }
    }
}

/// Copy the image into the staging work directory unless a file with the
/// same name is already there.
pub fn upload(session: &mut StagingSession, filename: &str, local: &Path) -> Result<()> {
    let workdir = session.workdir().to_owned();
    session.exec(&format!("mkdir -p {}", quote(&workdir)))?;
    let listing = session.exec(&format!("ls {}", quote(&workdir)))?;
    if listing.lines().any(|entry| entry.trim() == filename) {
        info!("{} is already in the staging environment", filename);
    } else {
        let remote = session.remote_path(filename);
        job::run_with_spinner("Uploading image", |handle| {
            handle.active(true);
            session.upload(local, &remote)
        })?;
    }
    session.uploaded = Some(filename.to_owned());
    Ok(())
}

/// Extract the uploaded file and record the raw image name (and the
/// extracted top-level folder, when there is one) on the session.
pub fn extract(session: &mut StagingSession, filename: &str, local: &Path) -> Result<()> {
    let kind = ArchiveKind::detect(filename)?;
    if kind == ArchiveKind::Image {
        session.image = Some(filename.to_owned());
        return Ok(());
    }

    let workdir = session.workdir().to_owned();
    if kind == ArchiveKind::Zip {
        if let Some(entry) = single_zip_entry(local) {
            let listing = session.exec(&format!("ls {}", quote(&workdir)))?;
            if listing.lines().any(|line| line.trim() == entry) {
                info!("{} is already extracted", entry);
                session.image = Some(entry);
                return Ok(());
            }
        }
    }

    session.exec(&format!("rm -f {}/*.img", quote(&workdir)))?;

    let archive = session.remote_path(filename);
    let command = kind
        .extract_command(&archive, &workdir)
        .ok_or_else(|| Error::UnsupportedArchive(filename.to_owned()))?;
    let output = job::run_with_spinner("Extracting image", |handle| {
        handle.active(true);
        session.exec_with_timeout(&command, EXTRACT_TIMEOUT)
    })?;

    session.image = image_from_output(&output, &workdir);
    session.folder = folder_from_output(&output, &workdir);
    if session.image.is_none() || session.folder.is_none() {
        let listing = session.exec(&format!("ls -p {}", quote(&workdir)))?;
        let (image, folder) = scan_listing(&listing);
        if session.image.is_none() {
            session.image = image;
        }
        if session.folder.is_none() {
            session.folder = folder;
        }
    }

    match &session.image {
        Some(image) => info!("Image extracted: {}", image),
        None => warn!("no .img file found after extracting {}", filename),
    }
    Ok(())
}

/// Gets an image into the staging environment, extracted.
pub struct ImagePreparer<'a> {
    source: ImageSource,
    fetcher: &'a dyn Fetcher,
}

impl<'a> ImagePreparer<'a> {
    pub fn new(source: ImageSource, fetcher: &'a dyn Fetcher) -> Self {
        ImagePreparer { source, fetcher }
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn resolve(&self) -> Result<(String, PathBuf)> {
        resolve_image_source(&self.source, self.fetcher)
    }

    /// Resolve, upload and extract.
    pub fn prepare(&self, session: &mut StagingSession) -> Result<()> {
        let resolved = self.resolve()?;
        self.prepare_resolved(session, resolved)
    }

    /// Upload and extract an already resolved image. A corrupt archive is
    /// discarded and the whole sequence starts again from the download.
    pub fn prepare_resolved(
        &self,
        session: &mut StagingSession,
        resolved: (String, PathBuf),
    ) -> Result<()> {
        let (mut filename, mut local) = resolved;
        let mut retries = 0;
        loop {
            upload(session, &filename, &local)?;
            match extract(session, &filename, &local) {
                Err(e) if is_crc_error(&e) && self.can_retry(retries) => {
                    retries += 1;
                    warn!(
                        "{} is corrupted, downloading it again ({}/{})",
                        filename, retries, MAX_EXTRACT_RETRIES
                    );
                    self.discard(session, &filename, &local)?;
                    let again = self.resolve()?;
                    filename = again.0;
                    local = again.1;
                }
                other => return other,
            }
        }
    }

    /// Only downloaded files can be fetched again; an operator supplied file
    /// is never deleted.
    fn can_retry(&self, retries: u32) -> bool {
        matches!(self.source, ImageSource::Remote(_)) && retries < MAX_EXTRACT_RETRIES
    }

    fn discard(&self, session: &mut StagingSession, filename: &str, local: &Path) -> Result<()> {
        fs::remove_file(local)?;
        let remote = session.remote_path(filename);
        session.exec(&format!("rm -f {}", quote(&remote)))?;
        session.uploaded = None;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
