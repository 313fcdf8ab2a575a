//! The device manifest: which devices are supported, which workflow each one
//! needs and which images can be flashed on it.
//!
//! The manifest is a JSON document refreshed from a remote location at most
//! once a day and cached in the user cache directory. It is read-only for the
//! rest of the crate.

mod cache;
mod models;

pub use cache::{embedded, is_fresh, load, refresh, TTL};
pub use models::{DeviceProfile, Family, ImageEntry, Manifest};

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        serde_json::from_str(
            r#"{
                "devices": [
                    {
                        "name": "raspberry-pi",
                        "alias": "rpi",
                        "partition": "p2",
                        "images": [{"title": "Raspbian", "url": "http://x/raspbian.zip",
                                    "user": "pi", "password": "raspberry"}]
                    },
                    {
                        "name": "nano-pi",
                        "models": [{"name": "nano-pi-neo", "alias": "neo"}]
                    },
                    {"name": "esp32", "family": "esp32"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn lookup_by_name_and_alias() {
        let manifest = manifest();
        assert_eq!(manifest.find("raspberry-pi").unwrap().name, "raspberry-pi");
        assert_eq!(manifest.find("RPI").unwrap().name, "raspberry-pi");
        assert!(manifest.find("pi").is_none());
    }

    #[test]
    fn lookup_reaches_sub_models() {
        assert_eq!(manifest().find("neo").unwrap().name, "nano-pi-neo");
    }

    #[test]
    fn defaults() {
        let manifest = manifest();
        let nano = manifest.find("nano-pi").unwrap();
        assert_eq!(nano.family, Family::Sd);
        assert_eq!(nano.partition, None);
        assert_eq!(manifest.find("esp32").unwrap().family, Family::Esp32);
    }

    #[test]
    fn custom_image_inherits_credentials() {
        let manifest = manifest();
        let rpi = manifest.find("rpi").unwrap();
        let custom = ImageEntry::custom("/tmp/my.img", rpi.default_image());
        assert_eq!(custom.url, "/tmp/my.img");
        assert_eq!(custom.user, "pi");
        assert_eq!(custom.password, "raspberry");
        assert_eq!(custom.version_or_default(), "custom");
    }
}
