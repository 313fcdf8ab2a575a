//! The built-in configuration steps: one interactive function collecting
//! answers and one function writing them to a target, per option.

use log::info;

use super::{
    network::{ask_free_address, ask_ipv4, AddressProbe, InterfaceConfig},
    store::{keys, ConfigStore, ConfigValue},
    ConfigTarget,
};
use crate::{dialog::Dialog, error::Result};

pub const LOCALE_FILE: &str = "/etc/default/locale";
pub const LOCALE_GEN_FILE: &str = "/etc/locale.gen";
pub const KEYBOARD_FILE: &str = "/etc/default/keyboard";
pub const WPA_SUPPLICANT_FILE: &str = "/etc/wpa_supplicant/wpa_supplicant.conf";
pub const INTERFACES_DIR: &str = "/etc/network/interfaces.d";
pub const RESOLV_TAIL_FILE: &str = "/etc/resolvconf/resolv.conf.d/tail";

// =============================================================================
// Config phase
// =============================================================================

pub fn config_locale(
    store: &mut ConfigStore,
    dialog: &mut dyn Dialog,
    _: &dyn AddressProbe,
) -> Result<()> {
    if !dialog.confirm("Configure the locale?", false)? {
        return Ok(());
    }
    let locale = dialog.input("Locale", Some("en_US.UTF-8"))?;
    store.set(keys::LOCALE, ConfigValue::Text(locale));
    Ok(())
}

pub fn config_keymap(
    store: &mut ConfigStore,
    dialog: &mut dyn Dialog,
    _: &dyn AddressProbe,
) -> Result<()> {
    if !dialog.confirm("Configure the keyboard layout?", false)? {
        return Ok(());
    }
    let layout = dialog.input("Keyboard layout", Some("us"))?;
    store.set(keys::KEYMAP, ConfigValue::Text(layout));
    Ok(())
}

pub fn config_wifi(
    store: &mut ConfigStore,
    dialog: &mut dyn Dialog,
    _: &dyn AddressProbe,
) -> Result<()> {
    if !dialog.confirm("Configure Wi-Fi?", false)? {
        return Ok(());
    }
    let ssid = dialog.input("Wi-Fi SSID", None)?;
    let password = dialog.password("Wi-Fi password")?;
    store.set(keys::WIFI_SSID, ConfigValue::Text(ssid));
    store.set(keys::WIFI_PASSWORD, ConfigValue::Secret(password));
    Ok(())
}

pub fn config_interface(
    store: &mut ConfigStore,
    dialog: &mut dyn Dialog,
    probe: &dyn AddressProbe,
) -> Result<()> {
    if !dialog.confirm("Configure a static network interface?", false)? {
        return Ok(());
    }
    let name = dialog.input("Interface", Some("eth0"))?;
    let address = ask_free_address(dialog, probe, "IP address")?;
    let netmask = ask_ipv4(dialog, "Netmask", Some("255.255.255.0"))?;
    let gateway = ask_ipv4(dialog, "Gateway", None)?;
    let dns = ask_ipv4(dialog, "DNS server", Some("8.8.8.8"))?;
    let network = if dialog.confirm("Set the network address?", false)? {
        Some(ask_ipv4(dialog, "Network", None)?)
    } else {
        None
    };
    store.set(
        keys::INTERFACE,
        ConfigValue::Interface(InterfaceConfig {
            name,
            address,
            netmask,
            gateway,
            dns,
            network,
        }),
    );
    Ok(())
}

pub fn config_dns(
    store: &mut ConfigStore,
    dialog: &mut dyn Dialog,
    _: &dyn AddressProbe,
) -> Result<()> {
    if !dialog.confirm("Add a secondary DNS server?", false)? {
        return Ok(());
    }
    let server = ask_ipv4(dialog, "Secondary DNS server", Some("8.8.4.4"))?;
    store.set(keys::DNS, ConfigValue::Text(server));
    Ok(())
}

// =============================================================================
// Apply phase
// =============================================================================

pub fn apply_locale(store: &ConfigStore, target: &mut dyn ConfigTarget) -> Result<()> {
    let locale = match store.text(keys::LOCALE) {
        Some(locale) => locale,
        None => return Ok(()),
    };
    info!("Setting the locale to {}", locale);
    target.write_file(LOCALE_FILE, &render_locale(locale))?;
    target.append_file(LOCALE_GEN_FILE, &render_locale_gen(locale))
}

pub fn apply_keymap(store: &ConfigStore, target: &mut dyn ConfigTarget) -> Result<()> {
    let layout = match store.text(keys::KEYMAP) {
        Some(layout) => layout,
        None => return Ok(()),
    };
    info!("Setting the keyboard layout to {}", layout);
    target.write_file(KEYBOARD_FILE, &render_keyboard(layout))
}

pub fn apply_wifi(store: &ConfigStore, target: &mut dyn ConfigTarget) -> Result<()> {
    let ssid = match store.text(keys::WIFI_SSID) {
        Some(ssid) => ssid,
        None => return Ok(()),
    };
    let password = store.secret(keys::WIFI_PASSWORD).unwrap_or_default();
    info!("Configuring Wi-Fi network {}", ssid);
    target.write_file(WPA_SUPPLICANT_FILE, &render_wpa_supplicant(ssid, password))
}

pub fn apply_interface(store: &ConfigStore, target: &mut dyn ConfigTarget) -> Result<()> {
    let interface = match store.interface(keys::INTERFACE) {
        Some(interface) => interface,
        None => return Ok(()),
    };
    info!("Configuring {} with address {}", interface.name, interface.address);
    let path = format!("{}/{}", INTERFACES_DIR, interface.name);
    target.write_file(&path, &interface.render())
}

pub fn apply_dns(store: &ConfigStore, target: &mut dyn ConfigTarget) -> Result<()> {
    let server = match store.text(keys::DNS) {
        Some(server) => server,
        None => return Ok(()),
    };
    info!("Adding DNS server {}", server);
    target.append_file(RESOLV_TAIL_FILE, &format!("nameserver {}\n", server))
}

/// Wi-Fi for AT firmware: station mode, then join.
pub fn apply_wifi_at(store: &ConfigStore, target: &mut dyn ConfigTarget) -> Result<()> {
    let ssid = match store.text(keys::WIFI_SSID) {
        Some(ssid) => ssid,
        None => return Ok(()),
    };
    let password = String::from_utf8_lossy(store.secret(keys::WIFI_PASSWORD).unwrap_or_default());
    info!("Joining Wi-Fi network {}", ssid);
    target.run("AT+CWMODE=1")?;
    target.run(&format!(
        "AT+CWJAP=\"{}\",\"{}\"",
        escape_at(ssid),
        escape_at(&password)
    ))?;
    Ok(())
}

// =============================================================================
// Renderers
// =============================================================================

pub fn render_locale(locale: &str) -> String {
    format!("LANG={0}\nLC_ALL={0}\nLANGUAGE={0}\n", locale)
}

/// The `locale.gen` line enabling `locale`, e.g. `en_US.UTF-8 UTF-8`.
pub fn render_locale_gen(locale: &str) -> String {
    let charset = locale.rsplit('.').next().filter(|_| locale.contains('.'));
    format!("{} {}\n", locale, charset.unwrap_or("UTF-8"))
}

pub fn render_keyboard(layout: &str) -> String {
    format!(
        "XKBMODEL=\"pc105\"\nXKBLAYOUT=\"{}\"\nXKBVARIANT=\"\"\nXKBOPTIONS=\"\"\nBACKSPACE=\"guess\"\n",
        layout
    )
}

pub fn render_wpa_supplicant(ssid: &str, password: &[u8]) -> String {
    let mut conf = String::from(
        "ctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\nupdate_config=1\n\nnetwork={\n",
    );
    conf.push_str(&format!("    ssid=\"{}\"\n", ssid));
    if password.is_empty() {
        conf.push_str("    key_mgmt=NONE\n");
    } else {
        conf.push_str(&format!("    psk=\"{}\"\n", String::from_utf8_lossy(password)));
    }
    conf.push_str("}\n");
    conf
}

fn escape_at(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | ',' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Answer, FakeProbe, RecordingTarget, ScriptedDialog};

    #[test]
    fn declined_option_leaves_no_key() {
        let mut store = ConfigStore::new();
        let mut dialog = ScriptedDialog::new(vec![Answer::Confirm(false)]);
        config_wifi(&mut store, &mut dialog, &FakeProbe::none()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn wifi_answers_are_stored() {
        let mut store = ConfigStore::new();
        let mut dialog = ScriptedDialog::new(vec![
            Answer::Confirm(true),
            Answer::Input("home".into()),
            Answer::Password(b"secret".to_vec()),
        ]);
        config_wifi(&mut store, &mut dialog, &FakeProbe::none()).unwrap();
        assert_eq!(store.text(keys::WIFI_SSID), Some("home"));
        assert_eq!(store.secret(keys::WIFI_PASSWORD), Some(&b"secret"[..]));
    }

    #[test]
    fn interface_answers_are_stored() {
        let mut store = ConfigStore::new();
        let mut dialog = ScriptedDialog::new(vec![
            Answer::Confirm(true),
            Answer::Input("wlan0".into()),
            Answer::Input("192.168.1.50".into()),
            Answer::Input("255.255.255.0".into()),
            Answer::Input("192.168.1.1".into()),
            Answer::Input("1.1.1.1".into()),
            Answer::Confirm(false),
        ]);
        config_interface(&mut store, &mut dialog, &FakeProbe::none()).unwrap();
        let interface = store.interface(keys::INTERFACE).unwrap();
        assert_eq!(interface.name, "wlan0");
        assert_eq!(interface.address, "192.168.1.50");
        assert_eq!(interface.gateway, "192.168.1.1");
        assert_eq!(interface.network, None);
    }

    #[test]
    fn apply_writes_expected_files() {
        let mut store = ConfigStore::new();
        store.set(keys::LOCALE, ConfigValue::Text("de_DE.UTF-8".into()));
        store.set(keys::DNS, ConfigValue::Text("8.8.4.4".into()));
        let mut target = RecordingTarget::default();

        apply_locale(&store, &mut target).unwrap();
        apply_dns(&store, &mut target).unwrap();

        assert_eq!(
            target.writes,
            vec![(LOCALE_FILE.to_owned(), render_locale("de_DE.UTF-8"))]
        );
        assert_eq!(
            target.appends,
            vec![
                (LOCALE_GEN_FILE.to_owned(), "de_DE.UTF-8 UTF-8\n".to_owned()),
                (RESOLV_TAIL_FILE.to_owned(), "nameserver 8.8.4.4\n".to_owned()),
            ]
        );
    }

    #[test]
    fn interface_file_is_named_after_the_interface() {
        let mut store = ConfigStore::new();
        let interface = InterfaceConfig {
            name: "eth1".into(),
            address: "10.0.0.2".into(),
            netmask: "255.0.0.0".into(),
            gateway: "10.0.0.1".into(),
            dns: "10.0.0.1".into(),
            network: None,
        };
        store.set(keys::INTERFACE, ConfigValue::Interface(interface.clone()));
        let mut target = RecordingTarget::default();
        apply_interface(&store, &mut target).unwrap();
        assert_eq!(
            target.writes,
            vec![("/etc/network/interfaces.d/eth1".to_owned(), interface.render())]
        );
    }

    #[test]
    fn at_wifi_sequence() {
        let mut store = ConfigStore::new();
        store.set(keys::WIFI_SSID, ConfigValue::Text("lab,2".into()));
        store.set(keys::WIFI_PASSWORD, ConfigValue::Secret(b"p\"w".to_vec()));
        let mut target = RecordingTarget::default();
        apply_wifi_at(&store, &mut target).unwrap();
        assert_eq!(
            target.commands,
            vec!["AT+CWMODE=1", r#"AT+CWJAP="lab\,2","p\"w""#]
        );
    }

    #[test]
    fn renderers() {
        assert_eq!(render_locale_gen("en_GB.ISO-8859-15"), "en_GB.ISO-8859-15 ISO-8859-15\n");
        assert_eq!(render_locale_gen("C"), "C UTF-8\n");
        assert!(render_keyboard("fr").contains("XKBLAYOUT=\"fr\""));
        let open = render_wpa_supplicant("cafe", b"");
        assert!(open.contains("key_mgmt=NONE"));
        assert!(!open.contains("psk"));
        assert!(render_wpa_supplicant("home", b"pw").contains("psk=\"pw\""));
    }
}
