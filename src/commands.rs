//! What each `iotflash` subcommand does, wired to the host implementations of
//! the workflow's collaborators.

use std::fs;

use console::style;
use log::{debug, info};

use crate::{
    config::{self, AppConfig},
    configure::PingProbe,
    devices,
    dialog::{Dialog, TermDialog},
    error::{Error, Result},
    flasher::FlashContext,
    job, logging,
    manifest::{self, DeviceProfile, ImageEntry, Manifest},
    repository::HttpFetcher,
    staging::{quote, SshBackend, StagingSession},
    workstation::{self, select_disk, WorkStation},
    Settings,
};

// =============================================================================
// Flashing
// =============================================================================

/// Flash the device and image named in `settings`, asking for whatever is
/// missing.
pub fn flash(settings: &Settings) -> Result<()> {
    let config = AppConfig::load()?;
    let cache = config::cache_dir()?;
    let manifest = manifest::load(&cache, &config.manifest_url)?;
    let mut dialog = TermDialog::default();

    let profile = pick_device(&manifest, settings.device.as_deref(), &mut dialog)?;
    let image = pick_image(&profile, settings.image.as_deref(), settings.quiet, &mut dialog)?;
    println!(
        "[+] Flashing {} with {}",
        style(&profile.name).green(),
        style(&image.title).cyan()
    );

    let staging = if devices::needs_staging(profile.family) {
        let backend = SshBackend::new(config.staging.clone());
        Some(StagingSession::new(
            Box::new(backend),
            &profile.name,
            &config.staging.workdir,
            &config.staging.mount_point,
        ))
    } else {
        None
    };
    let workstation = workstation::host();
    let fetcher = HttpFetcher::new()?;
    let flasher = devices::factory(&profile);

    let mut ctx = FlashContext {
        settings,
        configurator: devices::configurator(profile.family),
        profile,
        image,
        cache_dir: cache,
        dialog: &mut dialog,
        workstation: workstation.as_ref(),
        fetcher: &fetcher,
        probe: &PingProbe,
        staging,
        local_image: None,
        port: None,
        console: None,
    };
    flasher.flash(&mut ctx)
}

/// Like [`flash`], always going through the configuration dialog.
pub fn configure(settings: &Settings) -> Result<()> {
    let mut settings = settings.clone();
    settings.force_configure = true;
    settings.quiet = false;
    flash(&settings)
}

/// The device profile to flash: the one named, or the operator's pick. A
/// device split into models without images of its own needs a model pick.
pub fn pick_device(
    manifest: &Manifest,
    requested: Option<&str>,
    dialog: &mut dyn Dialog,
) -> Result<DeviceProfile> {
    let mut profile = match requested {
        Some(name) => manifest
            .find(name)
            .ok_or_else(|| Error::UnknownDevice(name.to_owned()))?,
        None => choose(dialog, "Select your device", &manifest.devices)?,
    };
    while profile.images.is_empty() && !profile.models.is_empty() {
        let prompt = format!("Select your {} model", profile.name);
        profile = choose(dialog, &prompt, &profile.models)?;
    }
    Ok(profile.clone())
}

/// The image to flash: an operator supplied location, or one of the
/// catalog's. Quiet runs take the first catalog image.
pub fn pick_image(
    profile: &DeviceProfile,
    requested: Option<&str>,
    quiet: bool,
    dialog: &mut dyn Dialog,
) -> Result<ImageEntry> {
    if let Some(location) = requested {
        return Ok(ImageEntry::custom(location, profile.default_image()));
    }
    match profile.images.len() {
        0 => Err(Error::ImageNotFound),
        1 => Ok(profile.images[0].clone()),
        _ if quiet => Ok(profile.images[0].clone()),
        _ => {
            let items: Vec<String> = profile
                .images
                .iter()
                .map(|image| format!("{} ({})", image.title, image.version_or_default()))
                .collect();
            let index = dialog.select("Select the image", &items, 0)?;
            Ok(profile.images[index].clone())
        }
    }
}

// =============================================================================
// Listing
// =============================================================================

pub fn list_devices() -> Result<()> {
    let config = AppConfig::load()?;
    let manifest = manifest::load(&config::cache_dir()?, &config.manifest_url)?;
    for line in device_lines(&manifest) {
        println!("{}", line);
    }
    Ok(())
}

/// The manifest as an indented tree: devices, their images, their models.
pub fn device_lines(manifest: &Manifest) -> Vec<String> {
    fn walk(profile: &DeviceProfile, depth: usize, lines: &mut Vec<String>) {
        let indent = "  ".repeat(depth);
        match &profile.alias {
            Some(alias) => lines.push(format!("{}{} ({})", indent, profile.name, alias)),
            None => lines.push(format!("{}{}", indent, profile.name)),
        }
        for image in &profile.images {
            lines.push(format!(
                "{}  - {} [{}]",
                indent,
                image.title,
                image.version_or_default()
            ));
        }
        for model in &profile.models {
            walk(model, depth + 1, lines);
        }
    }

    let mut lines = Vec::new();
    for device in &manifest.devices {
        walk(device, 0, &mut lines);
    }
    lines
}

pub fn list_disks() -> Result<()> {
    let disks = workstation::host().list_removable_disks()?;
    if disks.is_empty() {
        println!("[-] No removable disk found");
    }
    for disk in disks {
        println!("{}", disk.describe());
    }
    Ok(())
}

// =============================================================================
// Maintenance
// =============================================================================

/// Create the directories, write the default configuration unless there is
/// one, fetch the manifest and check the staging environment is reachable.
pub fn install() -> Result<()> {
    let cache = config::cache_dir()?;
    fs::create_dir_all(&cache)?;

    let path = config::config_file()?;
    let config = if path.exists() {
        info!("Keeping the configuration at {}", path.display());
        AppConfig::load_from(&path)?
    } else {
        let config = AppConfig::default();
        config.save_to(&path)?;
        println!(
            "[+] Default configuration written to {}",
            style(path.display()).cyan()
        );
        config
    };

    let manifest = manifest::refresh(&cache, &config.manifest_url)?;
    println!("[+] {} device families available", manifest.devices.len());

    let staging = &config.staging;
    let mut session = StagingSession::new(
        Box::new(SshBackend::new(staging.clone())),
        "install",
        &staging.workdir,
        &staging.mount_point,
    );
    job::run_with_spinner("Checking the staging environment", |handle| {
        handle.active(true);
        session.start()?;
        let workdir = quote(session.workdir());
        session.exec(&format!("mkdir -p {}", workdir))?;
        session.stop()
    })?;
    println!(
        "[+] Staging environment reachable at {}:{}",
        staging.host, staging.port
    );
    Ok(())
}

/// Remove the cache (images, manifest, log) and the configuration.
pub fn uninstall() -> Result<()> {
    let mut dialog = TermDialog::default();
    if !dialog.confirm(
        "Remove every downloaded image, the log and the configuration?",
        false,
    )? {
        return Err(Error::Declined);
    }
    for dir in &[config::cache_dir()?, config::config_dir()?] {
        if dir.exists() {
            debug!("removing {}", dir.display());
            fs::remove_dir_all(dir)?;
        }
    }
    println!("[+] iotflash data removed");
    Ok(())
}

pub fn update() -> Result<()> {
    let config = AppConfig::load()?;
    let manifest = manifest::refresh(&config::cache_dir()?, &config.manifest_url)?;
    println!(
        "[+] Device manifest updated, {} device families",
        manifest.devices.len()
    );
    Ok(())
}

pub fn log() -> Result<()> {
    let path = logging::log_file(&config::cache_dir()?);
    if !path.exists() {
        println!("[-] No log yet");
        return Ok(());
    }
    print!("{}", fs::read_to_string(&path)?);
    Ok(())
}

/// Erase every partition of a removable disk. Windows refuses to raw-write
/// a disk that still has mounted volumes, so this is where a stubborn SD
/// card is recovered from.
pub fn clean(settings: &Settings) -> Result<()> {
    let workstation = workstation::host();
    clean_with(workstation.as_ref(), &mut TermDialog::default(), settings)
}

pub fn clean_with(
    workstation: &dyn WorkStation,
    dialog: &mut dyn Dialog,
    settings: &Settings,
) -> Result<()> {
    let disk = select_disk(workstation, dialog, settings.disk.as_deref(), settings.quiet)?;
    if !settings.quiet {
        let prompt = format!("Erase every partition of {}?", disk.describe());
        if !dialog.confirm(&prompt, false)? {
            return Err(Error::Declined);
        }
    }
    job::run_with_spinner(&format!("Cleaning {}", disk.path), |handle| {
        handle.active(true);
        workstation.clean_disk(&disk)
    })?;
    println!("[+] {} is clean", style(&disk.path).green());
    Ok(())
}

fn choose<'m>(
    dialog: &mut dyn Dialog,
    prompt: &str,
    profiles: &'m [DeviceProfile],
) -> Result<&'m DeviceProfile> {
    if profiles.is_empty() {
        return Err(Error::UnknownDevice(prompt.to_owned()));
    }
    let items: Vec<String> = profiles
        .iter()
        .map(|profile| match &profile.alias {
            Some(alias) => format!("{} ({})", profile.name, alias),
            None => profile.name.clone(),
        })
        .collect();
    let index = dialog.select(prompt, &items, 0)?;
    Ok(&profiles[index])
}

// =============================================================================
// Unit Tests
// =============================================================================
