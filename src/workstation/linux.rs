//! Linux hosts: `lsblk`, `dd`, `umount`, `eject` and `wipefs`.

use std::path::Path;

use log::info;
use serde::Deserialize;
use serde_json::Value;

use super::{run, run_privileged, Disk, WorkStation};
use crate::error::Result;

pub struct LinuxWorkStation;

#[derive(Debug, Deserialize)]
struct Lsblk {
    blockdevices: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct BlockDevice {
    name: String,
    #[serde(default)]
    size: Value,
    model: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    /// A boolean on recent util-linux, `"0"`/`"1"` on older releases.
    #[serde(default)]
    rm: Value,
    tran: Option<String>,
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<BlockDevice>,
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "1" || s == "true",
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn bytes(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Removable whole disks from `lsblk -J -b` output.
pub fn parse_lsblk(json: &str) -> Result<Vec<Disk>> {
    let lsblk: Lsblk = serde_json::from_str(json)?;
    Ok(lsblk
        .blockdevices
        .into_iter()
        .filter(|dev| dev.kind.as_deref() == Some("disk"))
        .filter(|dev| truthy(&dev.rm) || dev.tran.as_deref() == Some("usb"))
        .filter(|dev| bytes(&dev.size) > 0)
        .map(|dev| Disk {
            path: format!("/dev/{}", dev.name),
            size: bytes(&dev.size),
            model: dev.model.as_deref().unwrap_or("").trim().to_owned(),
            name: dev.name,
        })
        .collect())
}

/// Mount points of `disk` and all its partitions.
pub fn mount_points(json: &str) -> Result<Vec<String>> {
    fn collect(devices: &[BlockDevice], out: &mut Vec<String>) {
        for dev in devices {
            if let Some(mp) = dev.mountpoint.as_deref().filter(|mp| !mp.is_empty()) {
                out.push(mp.to_owned());
            }
            collect(&dev.children, out);
        }
    }
    let lsblk: Lsblk = serde_json::from_str(json)?;
    let mut out = Vec::new();
    collect(&lsblk.blockdevices, &mut out);
    Ok(out)
}

impl WorkStation for LinuxWorkStation {
    fn list_removable_disks(&self) -> Result<Vec<Disk>> {
        let json = run("lsblk", &["-J", "-b", "-d", "-o", "NAME,SIZE,MODEL,TYPE,RM,TRAN"])?;
        parse_lsblk(&json)
    }

    fn write_to_disk(&self, image: &Path, disk: &Disk) -> Result<()> {
        self.unmount(disk)?;
        let input = format!("if={}", image.display());
        let output = format!("of={}", disk.path);
        info!("Writing {} to {}", image.display(), disk.path);
        run_privileged("dd", &[&input, &output, "bs=4M", "conv=fsync"])?;
        run("sync", &[])?;
        Ok(())
    }

    fn unmount(&self, disk: &Disk) -> Result<()> {
        let json = run("lsblk", &["-J", "-o", "NAME,MOUNTPOINT", &disk.path])?;
        for mp in mount_points(&json)? {
            info!("Unmounting {}", mp);
            run_privileged("umount", &[&mp])?;
        }
        Ok(())
    }

    fn eject(&self, disk: &Disk) -> Result<()> {
        run_privileged("eject", &[&disk.path]).map(drop)
    }

    fn clean_disk(&self, disk: &Disk) -> Result<()> {
        self.unmount(disk)?;
        run_privileged("wipefs", &["-a", &disk.path]).map(drop)
    }
}
