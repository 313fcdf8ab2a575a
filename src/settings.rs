//! Settings for one `iotflash` run: the device and image to use, how much
//! interaction is allowed, and the serial line parameters used by the console
//! based flashing flows.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all run settings and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// target for them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// Device name or alias as listed in the device manifest. When not set,
    /// the operator picks one interactively.
    pub device: Option<String>,
    /// Image location (URL or local path). When not set, the operator picks
    /// one of the device's catalog images.
    pub image: Option<String>,
    /// Skip every prompt: no configuration, no write confirmation, stop the
    /// staging environment silently.
    pub quiet: bool,
    /// Always run the configuration dialog without asking first.
    pub force_configure: bool,
    /// Target removable disk (e.g. `/dev/sdb`). When not set, the operator
    /// picks one of the detected removable disks.
    pub disk: Option<String>,

    /// The serial port name, usually the device path, or `auto`.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

impl Settings {
    /// `true` when the serial port should be discovered rather than opened by
    /// name.
    pub fn auto_port(&self) -> bool {
        match self.path.as_deref() {
            None | Some("auto") => true,
            Some(_) => false,
        }
    }
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().device("raspberry-pi").quiet(true).finalize();
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBuilder {
    /// Start building the settings using default values, no device, no image
    /// and automatic port selection.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                device: None,
                image: None,
                quiet: false,
                force_configure: false,
                disk: None,
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                _private_use_builder: (),
            },
        }
    }

    /// Set the device name or alias
    pub fn device<'a>(mut self, device: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.device = Some(device.into().into_owned());
        self
    }

    /// Set the image location (URL or local path)
    pub fn image<'a>(mut self, image: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.image = Some(image.into().into_owned());
        self
    }

    /// Run without any prompt
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.settings.quiet = quiet;
        self
    }

    /// Run the configuration dialog without asking first
    pub fn force_configure(mut self, force: bool) -> Self {
        self.settings.force_configure = force;
        self
    }

    /// Set the target removable disk
    pub fn disk<'a>(mut self, disk: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.disk = Some(disk.into().into_owned());
        self
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().into_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            device: None,
            image: None,
            quiet: false,
            force_configure: false,
            disk: None,
            path: None,
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            _private_use_builder: (),
        }
    )
}

#[test]
fn device_and_image() {
    let settings = SettingsBuilder::new()
        .device("raspberry-pi")
        .image("/tmp/raspbian.img")
        .finalize();
    assert_eq!(settings.device.unwrap(), "raspberry-pi");
    assert_eq!(settings.image.unwrap(), "/tmp/raspbian.img");
}

#[test]
fn quiet_and_disk() {
    let settings = SettingsBuilder::new().quiet(true).disk("/dev/sdb").finalize();
    assert!(settings.quiet);
    assert_eq!(settings.disk.unwrap(), "/dev/sdb");
}

#[test]
fn auto_port() {
    assert!(SettingsBuilder::new().finalize().auto_port());
    assert!(SettingsBuilder::new().path("auto").finalize().auto_port());
    assert!(!SettingsBuilder::new().path("/dev/ttyUSB0").finalize().auto_port());
}

#[test]
fn serial_line() {
    let settings = SettingsBuilder::new()
        .baud_rate(230_400)
        .parity(Parity::Even)
        .stop_bits(StopBits::Two)
        .finalize();
    assert_eq!(settings.baud_rate, 230_400);
    assert_eq!(settings.parity, Parity::Even);
    assert_eq!(settings.stop_bits, StopBits::Two);
}
