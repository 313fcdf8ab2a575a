//! Image downloads into the per-device cache.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use retry::{delay, retry_with_index};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Download attempts before giving up.
pub const MAX_DOWNLOAD_ATTEMPTS: usize = 3;

// =============================================================================
// Public Interface
// =============================================================================

/// A remote file cached under `dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericRepository {
    url: String,
    version: String,
    dir: PathBuf,
    checksum: Option<String>,
}

impl GenericRepository {
    pub fn new(url: &str, version: &str, dir: &Path) -> Self {
        GenericRepository {
            url: url.to_owned(),
            version: version.to_owned(),
            dir: dir.to_owned(),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum.filter(|c| !c.is_empty());
        self
    }

    /// The file name: the final path segment of the URL.
    pub fn name(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the downloaded file lives on the host.
    pub fn path(&self) -> PathBuf {
        self.dir.join(self.name())
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }
}

/// The download capability used to acquire images.
pub trait Fetcher: Send + Sync {
    /// Make the repository's file available locally and return its path.
    fn fetch(&self, repo: &GenericRepository) -> Result<PathBuf>;
}

/// Downloads over HTTP(S) with a progress bar and bounded retries.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("iotflash/", env!("CARGO_PKG_VERSION")))
            // Images are large; only the connection gets a deadline.
            .timeout(None)
            .build()?;
        Ok(HttpFetcher { client })
    }

    fn download(&self, repo: &GenericRepository) -> Result<()> {
        let response = self.client.get(repo.url()).send()?.error_for_status()?;

        let pb = match response.content_length() {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        pb.set_style(ProgressStyle::default_bar()
            .template("[+] ⏬ {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .progress_chars("=>-"));
        pb.set_message(repo.name().to_owned());

        // Write to a temporary name so an interrupted download is never
        // mistaken for a cached file.
        let partial = repo.dir().join(format!("{}.part", repo.name()));
        let mut reader = ProgressReader::new(response, pb.clone());
        let mut file = File::create(&partial)?;
        io::copy(&mut reader, &mut file)?;
        pb.finish_with_message(format!("{} downloaded", repo.name()));

        fs::rename(&partial, repo.path())?;
        Ok(())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, repo: &GenericRepository) -> Result<PathBuf> {
        fs::create_dir_all(repo.dir())?;
        let path = repo.path();
        if path.exists() {
            info!("Using cached image {}", path.display());
            return Ok(path);
        }

        let result = retry_with_index(
            delay::Fixed::from_millis(2000).take(MAX_DOWNLOAD_ATTEMPTS - 1),
            |index| -> Result<()> {
                debug!("Downloading {} (attempt {})", repo.url(), index);
                self.download(repo)?;
                if let Err(e) = verify_checksum(&path, repo.checksum()) {
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
                Ok(())
            },
        );
        match result {
            Ok(()) => Ok(path),
            Err(retry::Error::Operation { error, tries, .. }) => {
                info!("Failed to download {} after {} tries", repo.url(), tries);
                Err(error)
            }
            Err(retry::Error::Internal(msg)) => Err(Error::Download(msg)),
        }
    }
}

/// Counts the bytes flowing through `inner` on a progress bar.
pub struct ProgressReader<R> {
    inner: R,
    pb: ProgressBar,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, pb: ProgressBar) -> Self {
        ProgressReader { inner, pb }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pb.inc(n as u64);
        Ok(n)
    }
}

/// Compare the sha256 of `path` with `expected` (hex). No expectation means
/// nothing to verify.
pub fn verify_checksum(path: &Path, expected: Option<&str>) -> Result<()> {
    let expected = match expected {
        Some(expected) => expected.to_ascii_lowercase(),
        None => return Ok(()),
    };

    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    if actual != expected {
        return Err(Error::Checksum {
            file: path.display().to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
