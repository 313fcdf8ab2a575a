//! Device catalog entries.

use serde::{Deserialize, Serialize};

/// The flashing workflow variant a device needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    /// Image written to an SD card after being configured in staging.
    Sd,
    Colibri,
    Edison,
    Esp32,
    Esp8266,
}

impl Default for Family {
    fn default() -> Self {
        Family::Sd
    }
}

/// One OS image offered for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Hex encoded sha256 of the downloaded file.
    #[serde(default)]
    pub checksum: Option<String>,
}

impl ImageEntry {
    /// An entry for an image given on the command line, inheriting the
    /// credentials of the device's default image when there is one.
    pub fn custom(location: &str, template: Option<&ImageEntry>) -> Self {
        ImageEntry {
            title: location.to_owned(),
            url: location.to_owned(),
            version: "custom".into(),
            user: template.map(|t| t.user.clone()).unwrap_or_default(),
            password: template.map(|t| t.password.clone()).unwrap_or_default(),
            checksum: None,
        }
    }

    pub fn version_or_default(&self) -> &str {
        if self.version.is_empty() {
            "latest"
        } else {
            &self.version
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub family: Family,
    /// Loop partition suffix holding the root filesystem (e.g. `p2`). When
    /// absent the partition is detected.
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    #[serde(default)]
    pub models: Vec<DeviceProfile>,
}

impl DeviceProfile {
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self
                .alias
                .as_deref()
                .map_or(false, |alias| alias.eq_ignore_ascii_case(name))
    }

    /// Find `name` among this profile and its sub-models, depth first.
    pub fn find(&self, name: &str) -> Option<&DeviceProfile> {
        if self.matches(name) {
            return Some(self);
        }
        self.models.iter().find_map(|model| model.find(name))
    }

    pub fn default_image(&self) -> Option<&ImageEntry> {
        self.images.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub devices: Vec<DeviceProfile>,
}

impl Manifest {
    pub fn find(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find_map(|device| device.find(name))
    }
}
