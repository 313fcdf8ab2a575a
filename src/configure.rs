//! First-boot configuration of a device image or a live device.
//!
//! A [`Configurator`] is an ordered list of steps indexed by
//! [`ConfigOption`]. Each step has two halves:
//!
//!  * a **config** function asking the operator questions and recording the
//!    answers in the [`ConfigStore`],
//!  * an **apply** function rendering the recorded answers and writing them
//!    to a [`ConfigTarget`]: a mounted image root, a device shell or an AT
//!    command channel.
//!
//! Apply functions do nothing when their key was never recorded, so
//! [`Configurator::write`] can always run every step. Devices swap halves
//! with [`Configurator::set_config`] and [`Configurator::set_apply`].

mod network;
mod steps;
mod store;

use log::{debug, info};

pub use network::{
    ask_free_address, ask_ipv4, is_ipv4, AddressProbe, InterfaceConfig, PingProbe,
    MAX_INPUT_ATTEMPTS,
};
pub use steps::*;
pub use store::{keys, ConfigOption, ConfigStore, ConfigValue};

use crate::{
    dialog::Dialog,
    error::Result,
    staging::{quote, StagingSession},
};

pub type ConfigFn = fn(&mut ConfigStore, &mut dyn Dialog, &dyn AddressProbe) -> Result<()>;
pub type ApplyFn = fn(&ConfigStore, &mut dyn ConfigTarget) -> Result<()>;

/// Where rendered configuration ends up.
pub trait ConfigTarget {
    /// Replace the file at `path`, an absolute path on the device.
    fn write_file(&mut self, path: &str, content: &str) -> Result<()>;

    fn append_file(&mut self, path: &str, content: &str) -> Result<()>;

    /// Run a raw command on the target.
    fn run(&mut self, command: &str) -> Result<String>;
}

#[derive(Clone, Copy)]
pub struct Step {
    pub config: Option<ConfigFn>,
    pub apply: Option<ApplyFn>,
}

pub struct Configurator {
    steps: Vec<(ConfigOption, Step)>,
    store: ConfigStore,
}

impl Default for Configurator {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurator {
    /// All built-in steps, writing configuration files.
    pub fn new() -> Self {
        let step = |config: ConfigFn, apply: ApplyFn| Step {
            config: Some(config),
            apply: Some(apply),
        };
        Configurator {
            steps: vec![
                (ConfigOption::Locale, step(config_locale, apply_locale)),
                (ConfigOption::Keymap, step(config_keymap, apply_keymap)),
                (ConfigOption::Wifi, step(config_wifi, apply_wifi)),
                (ConfigOption::Interface, step(config_interface, apply_interface)),
                (ConfigOption::Dns, step(config_dns, apply_dns)),
            ],
            store: ConfigStore::new(),
        }
    }

    /// Keep only the steps for `options`, in their usual order.
    pub fn only(mut self, options: &[ConfigOption]) -> Self {
        self.steps.retain(|(option, _)| options.contains(option));
        self
    }

    pub fn set_config(&mut self, option: ConfigOption, config: Option<ConfigFn>) {
        if let Some(step) = self.step_mut(option) {
            step.config = config;
        }
    }

    pub fn set_apply(&mut self, option: ConfigOption, apply: Option<ApplyFn>) {
        if let Some(step) = self.step_mut(option) {
            step.apply = apply;
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    pub fn options(&self) -> Vec<ConfigOption> {
        self.steps.iter().map(|(option, _)| *option).collect()
    }

    /// Run the config half of every step. Unless `force` is set the operator
    /// is first asked whether to configure at all; declining is not an error.
    /// Returns whether any step ran.
    pub fn setup(
        &mut self,
        device: &str,
        dialog: &mut dyn Dialog,
        probe: &dyn AddressProbe,
        force: bool,
    ) -> Result<bool> {
        if !force && !dialog.confirm(&format!("Would you like to configure your {}?", device), false)? {
            info!("Configuration skipped");
            return Ok(false);
        }
        for (option, step) in &self.steps {
            if let Some(config) = step.config {
                debug!("Collecting {:?} configuration", option);
                config(&mut self.store, dialog, probe)?;
            }
        }
        Ok(true)
    }

    /// Run the apply half of every step, stopping at the first failure.
    pub fn write(&self, target: &mut dyn ConfigTarget) -> Result<()> {
        for (option, step) in &self.steps {
            if let Some(apply) = step.apply {
                debug!("Applying {:?} configuration", option);
                apply(&self.store, target)?;
            }
        }
        Ok(())
    }

    fn step_mut(&mut self, option: ConfigOption) -> Option<&mut Step> {
        self.steps
            .iter_mut()
            .find(|(o, _)| *o == option)
            .map(|(_, step)| step)
    }
}

/// The root filesystem of an image mounted in the staging environment.
pub struct MountedRoot<'a> {
    session: &'a mut StagingSession,
}

impl<'a> MountedRoot<'a> {
    pub fn new(session: &'a mut StagingSession) -> Self {
        MountedRoot { session }
    }

    fn redirect(&mut self, path: &str, content: &str, operator: &str) -> Result<()> {
        let full = format!("{}{}", self.session.mount_point(), path);
        let dir = full.rsplitn(2, '/').nth(1).unwrap_or("/").to_owned();
        let command = format!(
            "mkdir -p {} && cat {} {} <<'IOTFLASH_EOF'\n{}IOTFLASH_EOF",
            quote(&dir),
            operator,
            quote(&full),
            content
        );
        self.session.exec(&command).map(drop)
    }
}

impl ConfigTarget for MountedRoot<'_> {
    fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.redirect(path, content, ">")
    }

    fn append_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.redirect(path, content, ">>")
    }

    fn run(&mut self, command: &str) -> Result<String> {
        let chroot = format!("chroot {} sh -c {}", quote(self.session.mount_point()), quote(command));
        self.session.exec(&chroot)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
