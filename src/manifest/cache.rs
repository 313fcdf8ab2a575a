//! Local copy of the device manifest with a time-to-live.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use log::{debug, info, warn};

use super::models::Manifest;
use crate::error::{Error, Result};

/// Cached manifests younger than this are used without refreshing.
pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);

const CACHE_FILE: &str = "devices.json";
const EMBEDDED: &str = include_str!("../../assets/devices.json");

pub fn cache_file(cache: &Path) -> PathBuf {
    cache.join(CACHE_FILE)
}

/// `true` when the file at `path` exists and was modified within `ttl`.
pub fn is_fresh(path: &Path, ttl: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age < ttl)
}

pub fn embedded() -> Result<Manifest> {
    Ok(serde_json::from_str(EMBEDDED)?)
}

fn read(path: &Path) -> Result<Manifest> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn fetch(url: &str) -> Result<String> {
    info!("Refreshing the device manifest from {}", url);
    let body = reqwest::blocking::get(url)?.error_for_status()?.text()?;
    // Refuse to cache something that does not parse.
    serde_json::from_str::<Manifest>(&body)?;
    Ok(body)
}

/// Refresh the cached manifest from `url` unconditionally.
pub fn refresh(cache: &Path, url: &str) -> Result<Manifest> {
    refresh_with(cache, || fetch(url))
}

/// Load the manifest: a fresh cache wins, otherwise a refresh is attempted,
/// falling back to a stale cache and finally to the embedded copy.
pub fn load(cache: &Path, url: &str) -> Result<Manifest> {
    load_with(cache, || fetch(url))
}

fn refresh_with<F>(cache: &Path, fetch: F) -> Result<Manifest>
where
    F: FnOnce() -> Result<String>,
{
    let body = fetch()?;
    fs::create_dir_all(cache)?;
    fs::write(cache_file(cache), &body)?;
    Ok(serde_json::from_str(&body)?)
}

fn load_with<F>(cache: &Path, fetch: F) -> Result<Manifest>
where
    F: FnOnce() -> Result<String>,
{
    let path = cache_file(cache);
    if is_fresh(&path, TTL) {
        debug!("using cached manifest {}", path.display());
        return read(&path);
    }

    match refresh_with(cache, fetch) {
        Ok(manifest) => Ok(manifest),
        Err(e) => {
            warn!("cannot refresh the device manifest: {}", e);
            if path.exists() {
                read(&path)
            } else {
                embedded()
            }
        }
    }
}
