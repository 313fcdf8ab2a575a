//! Persisted configuration and per-user directories.
//!
//! The configuration file lives at `<config dir>/iotflash/config.json`. A
//! missing file is not an error: defaults are used and `iotflash install`
//! writes them out for editing.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const APP_DIR: &str = "iotflash";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_MANIFEST_URL: &str = "https://iotflash.github.io/manifest/devices.json";

/// How the staging environment authenticates the SSH session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SshAuth {
    Agent,
    Key(PathBuf),
    Password(String),
}

/// Connection and layout of the staging environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StagingConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    /// Remote directory that receives uploaded and extracted images.
    pub workdir: String,
    /// Remote directory the image partition is mounted on.
    pub mount_point: String,
    /// Host command that boots the sandbox (e.g. `VBoxManage startvm ...`).
    pub start_command: Option<String>,
    /// Host command that powers the sandbox off.
    pub stop_command: Option<String>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        StagingConfig {
            host: "127.0.0.1".into(),
            port: 2222,
            username: "root".into(),
            auth: SshAuth::Password("root".into()),
            workdir: "/root/images".into(),
            mount_point: "/mnt/image".into(),
            start_command: None,
            stop_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub manifest_url: String,
    pub staging: StagingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            manifest_url: DEFAULT_MANIFEST_URL.into(),
            staging: StagingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// `<cache dir>/iotflash`: manifest cache, downloaded images, log file.
pub fn cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| Error::Other("cannot determine the user cache directory".into()))
}

/// `<config dir>/iotflash`.
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| Error::Other("cannot determine the user config directory".into()))
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Images are cached per device and per image version.
pub fn image_cache_dir(cache: &Path, device: &str, version: &str) -> PathBuf {
    cache.join("images").join(device).join(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("none.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = AppConfig::default();
        config.staging.auth = SshAuth::Key("/home/me/.ssh/id_ed25519".into());
        config.staging.start_command = Some("VBoxManage startvm iotflash".into());
        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"staging": {"host": "10.0.0.5"}}"#).unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.staging.host, "10.0.0.5");
        assert_eq!(config.staging.port, 2222);
        assert_eq!(config.manifest_url, DEFAULT_MANIFEST_URL);
    }

    #[test]
    fn image_cache_is_keyed_by_device_and_version() {
        let dir = image_cache_dir(Path::new("/c"), "raspberry-pi", "2019-04-08");
        assert_eq!(dir, Path::new("/c/images/raspberry-pi/2019-04-08"));
    }
}
