//! macOS hosts: `diskutil` and `dd` on the raw disk node.

use std::path::Path;

use log::info;

use super::{run, run_privileged, Disk, WorkStation};
use crate::error::Result;

pub struct MacWorkStation;

/// Parse `diskutil list external physical`. Each disk starts with a header
/// such as `/dev/disk4 (external, physical):`; its size is the starred value
/// on the partition scheme line (`0: FDisk_partition_scheme *15.9 GB disk4`).
pub fn parse_diskutil_list(text: &str) -> Vec<Disk> {
    let mut disks: Vec<Disk> = Vec::new();
    let mut external = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("/dev/disk") {
            external = trimmed.contains("external");
            if !external {
                continue;
            }
            let path = trimmed.split_whitespace().next().unwrap_or_default();
            disks.push(Disk {
                name: path.trim_start_matches("/dev/").to_owned(),
                path: path.to_owned(),
                size: 0,
                model: String::new(),
            });
        } else if external && trimmed.starts_with("0:") {
            if let Some(disk) = disks.last_mut().filter(|d| d.size == 0) {
                disk.size = starred_size(trimmed).unwrap_or(0);
                disk.model = trimmed
                    .split_whitespace()
                    .nth(1)
                    .filter(|scheme| !scheme.starts_with('*'))
                    .unwrap_or_default()
                    .to_owned();
            }
        }
    }
    disks
}

fn starred_size(line: &str) -> Option<u64> {
    let mut tokens = line.split_whitespace().skip_while(|t| !t.starts_with('*'));
    let number: f64 = tokens.next()?.trim_start_matches('*').parse().ok()?;
    let unit = match tokens.next()? {
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => 1.0,
    };
    Some((number * unit).round() as u64)
}

/// `/dev/disk4` is written through its raw node `/dev/rdisk4`.
pub fn raw_node(path: &str) -> String {
    path.replacen("/dev/disk", "/dev/rdisk", 1)
}

impl WorkStation for MacWorkStation {
    fn list_removable_disks(&self) -> Result<Vec<Disk>> {
        let text = run("diskutil", &["list", "external", "physical"])?;
        Ok(parse_diskutil_list(&text))
    }

    fn write_to_disk(&self, image: &Path, disk: &Disk) -> Result<()> {
        self.unmount(disk)?;
        let input = format!("if={}", image.display());
        let output = format!("of={}", raw_node(&disk.path));
        info!("Writing {} to {}", image.display(), disk.path);
        run_privileged("dd", &["bs=1m", &input, &output])?;
        Ok(())
    }

    fn unmount(&self, disk: &Disk) -> Result<()> {
        run("diskutil", &["unmountDisk", &disk.path]).map(drop)
    }

    fn eject(&self, disk: &Disk) -> Result<()> {
        run("diskutil", &["eject", &disk.path]).map(drop)
    }

    fn clean_disk(&self, disk: &Disk) -> Result<()> {
        run("diskutil", &["eraseDisk", "FAT32", "IOTFLASH", "MBRFormat", &disk.path]).map(drop)
    }
}
