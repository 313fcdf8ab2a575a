//! The key-value store shared by the two configuration phases.

use std::collections::HashMap;

use super::network::InterfaceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigOption {
    Locale,
    Keymap,
    Wifi,
    Interface,
    Dns,
}

impl ConfigOption {
    /// All options, in the order their steps run.
    pub const ALL: [ConfigOption; 5] = [
        ConfigOption::Locale,
        ConfigOption::Keymap,
        ConfigOption::Wifi,
        ConfigOption::Interface,
        ConfigOption::Dns,
    ];

    /// The key whose presence means the operator opted in to this option.
    pub fn key(self) -> &'static str {
        match self {
            ConfigOption::Locale => keys::LOCALE,
            ConfigOption::Keymap => keys::KEYMAP,
            ConfigOption::Wifi => keys::WIFI_SSID,
            ConfigOption::Interface => keys::INTERFACE,
            ConfigOption::Dns => keys::DNS,
        }
    }
}

pub mod keys {
    pub const LOCALE: &str = "locale";
    pub const KEYMAP: &str = "keymap";
    pub const WIFI_SSID: &str = "wifi.ssid";
    pub const WIFI_PASSWORD: &str = "wifi.password";
    pub const INTERFACE: &str = "interface";
    pub const DNS: &str = "dns";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Text(String),
    /// Secrets stay bytes end to end.
    Secret(Vec<u8>),
    Flag(bool),
    Interface(InterfaceConfig),
}

/// Answers collected during setup. A key is present only when the operator
/// chose to configure the matching aspect.
#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    values: HashMap<String, ConfigValue>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ConfigValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn secret(&self, key: &str) -> Option<&[u8]> {
        match self.values.get(key) {
            Some(ConfigValue::Secret(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(ConfigValue::Flag(true)))
    }

    pub fn interface(&self, key: &str) -> Option<&InterfaceConfig> {
        match self.values.get(key) {
            Some(ConfigValue::Interface(config)) => Some(config),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_ignore_other_kinds() {
        let mut store = ConfigStore::new();
        store.set(keys::LOCALE, ConfigValue::Text("en_US.UTF-8".into()));
        store.set(keys::WIFI_PASSWORD, ConfigValue::Secret(b"hunter2".to_vec()));
        store.set("flag", ConfigValue::Flag(true));

        assert_eq!(store.text(keys::LOCALE), Some("en_US.UTF-8"));
        assert_eq!(store.secret(keys::WIFI_PASSWORD), Some(&b"hunter2"[..]));
        assert_eq!(store.text(keys::WIFI_PASSWORD), None);
        assert!(store.flag("flag"));
        assert!(!store.flag(keys::LOCALE));
        assert!(!store.contains(keys::DNS));
    }

    #[test]
    fn every_option_has_a_distinct_key() {
        let mut keys: Vec<_> = ConfigOption::ALL.iter().map(|o| o.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), ConfigOption::ALL.len());
    }
}
