//! Windows hosts: PowerShell `Get-Disk`, raw writes to `\\.\PhysicalDriveN`
//! and `diskpart`.

use std::{
    env,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::Path,
};

use log::info;
use serde::Deserialize;
use serde_json::Value;

use super::{run, Disk, WorkStation};
use crate::error::{Error, Result};

/// Raw device writes must be sector aligned.
const SECTOR: usize = 512;
const CHUNK: usize = 4 * 1024 * 1024;

pub struct WindowsWorkStation;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsDisk {
    number: u32,
    friendly_name: Option<String>,
    size: u64,
}

/// Parse `Get-Disk | ConvertTo-Json`, which yields a bare object for a
/// single disk and an array otherwise.
pub fn parse_get_disk(json: &str) -> Result<Vec<Disk>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let disks: Vec<PsDisk> = match serde_json::from_str::<Value>(json)? {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?,
        single => vec![serde_json::from_value(single)?],
    };
    Ok(disks
        .into_iter()
        .map(|disk| Disk {
            name: disk.number.to_string(),
            path: physical_drive(disk.number),
            size: disk.size,
            model: disk.friendly_name.unwrap_or_default(),
        })
        .collect())
}

pub fn physical_drive(number: u32) -> String {
    format!(r"\\.\PhysicalDrive{}", number)
}

fn diskpart(script: &str) -> Result<()> {
    let path = env::temp_dir().join(format!("iotflash_diskpart_{}.txt", std::process::id()));
    fs::write(&path, script)?;
    let result = run("diskpart", &["/s", &path.to_string_lossy()]);
    let _ = fs::remove_file(&path);
    result.map(drop)
}

/// Copy `src` into `dst` in sector aligned chunks, padding the tail.
pub fn copy_aligned<R: Read, W: Write>(src: &mut R, dst: &mut W) -> io::Result<u64> {
    let mut buffer = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let mut filled = 0;
        while filled < CHUNK {
            match src.read(&mut buffer[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if filled == 0 {
            break;
        }
        let aligned = (filled + SECTOR - 1) / SECTOR * SECTOR;
        for byte in &mut buffer[filled..aligned] {
            *byte = 0;
        }
        dst.write_all(&buffer[..aligned])?;
        total += filled as u64;
        if filled < CHUNK {
            break;
        }
    }
    dst.flush()?;
    Ok(total)
}

impl WorkStation for WindowsWorkStation {
    fn list_removable_disks(&self) -> Result<Vec<Disk>> {
        let json = run(
            "powershell",
            &[
                "-NoProfile",
                "-Command",
                "Get-Disk | Where-Object BusType -eq 'USB' | Select-Object Number,FriendlyName,Size | ConvertTo-Json",
            ],
        )?;
        parse_get_disk(&json)
    }

    fn write_to_disk(&self, image: &Path, disk: &Disk) -> Result<()> {
        // Windows refuses raw writes over mounted volumes.
        self.clean_disk(disk)?;
        info!("Writing {} to {}", image.display(), disk.path);
        let mut src = File::open(image)?;
        let mut dst = OpenOptions::new()
            .write(true)
            .open(&disk.path)
            .map_err(|e| Error::Other(format!("{}: {} (run as administrator)", disk.path, e)))?;
        copy_aligned(&mut src, &mut dst)?;
        Ok(())
    }

    fn unmount(&self, disk: &Disk) -> Result<()> {
        diskpart(&format!("select disk {}\noffline disk\nonline disk\n", disk.name))
    }

    fn eject(&self, disk: &Disk) -> Result<()> {
        diskpart(&format!("select disk {}\noffline disk\n", disk.name))
    }

    fn clean_disk(&self, disk: &Disk) -> Result<()> {
        diskpart(&format!("select disk {}\nclean\n", disk.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_disk_object() {
        let json = r#"{"Number": 2, "FriendlyName": "SanDisk Ultra", "Size": 32015679488}"#;
        let disks = parse_get_disk(json).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].path, r"\\.\PhysicalDrive2");
        assert_eq!(disks[0].name, "2");
        assert_eq!(disks[0].model, "SanDisk Ultra");
    }

    #[test]
    fn disk_array_and_empty_output() {
        let json = r#"[{"Number": 1, "FriendlyName": null, "Size": 1}, {"Number": 3, "FriendlyName": "X", "Size": 2}]"#;
        let disks = parse_get_disk(json).unwrap();
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].model, "");
        assert!(parse_get_disk("  \r\n").unwrap().is_empty());
    }

    #[test]
    fn aligned_copy_pads_the_tail() {
        let data = vec![7u8; 1000];
        let mut out = Vec::new();
        let copied = copy_aligned(&mut &data[..], &mut out).unwrap();
        assert_eq!(copied, 1000);
        assert_eq!(out.len(), 1024);
        assert!(out[1000..].iter().all(|b| *b == 0));
    }
}
