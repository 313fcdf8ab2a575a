//! Archive formats and the heuristics that find the raw image they contain.

use std::{fs::File, path::Path};

use log::debug;

use crate::error::{Error, Result};
use crate::staging::quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Already a raw image, nothing to extract.
    Image,
    Zip,
    TarGz,
    TarBz2,
    TarXz,
    SevenZip,
    Xz,
    Gz,
}

impl ArchiveKind {
    /// Select the archive kind from the file name suffix.
    pub fn detect(name: &str) -> Result<Self> {
        let lower = name.to_ascii_lowercase();
        let kind = if lower.ends_with(".img") {
            ArchiveKind::Image
        } else if lower.ends_with(".zip") {
            ArchiveKind::Zip
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else if lower.ends_with(".tar.bz2") {
            ArchiveKind::TarBz2
        } else if lower.ends_with(".tar.xz") {
            ArchiveKind::TarXz
        } else if lower.ends_with(".7z") {
            ArchiveKind::SevenZip
        } else if lower.ends_with(".xz") {
            ArchiveKind::Xz
        } else if lower.ends_with(".gz") {
            ArchiveKind::Gz
        } else {
            return Err(Error::UnsupportedArchive(name.to_owned()));
        };
        Ok(kind)
    }

    /// The command extracting `archive` into `dest`, both remote paths.
    pub fn extract_command(self, archive: &str, dest: &str) -> Option<String> {
        let (a, d) = (quote(archive), quote(dest));
        let command = match self {
            ArchiveKind::Image => return None,
            ArchiveKind::Zip => format!("unzip -o {} -d {}", a, d),
            ArchiveKind::TarGz => format!("tar -xzvf {} -C {}", a, d),
            ArchiveKind::TarBz2 => format!("tar -xjvf {} -C {}", a, d),
            ArchiveKind::TarXz => format!("tar -xJvf {} -C {}", a, d),
            ArchiveKind::SevenZip => format!("7z x -y -o{} {}", d, a),
            // Both decompress next to the archive, which already is `dest`.
            ArchiveKind::Xz => format!("unxz -fk {}", a),
            ArchiveKind::Gz => format!("gunzip -fk {}", a),
        };
        Some(command)
    }
}

/// `true` when extraction failed because the archive is corrupt.
pub fn is_crc_error(err: &Error) -> bool {
    match err {
        Error::Remote { stderr, .. } => stderr.to_ascii_lowercase().contains("crc error"),
        _ => false,
    }
}

fn tokens<'a>(output: &'a str, workdir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let prefix = format!("{}/", workdir.trim_end_matches('/'));
    output
        .split_whitespace()
        .map(|token| token.trim_matches(|c| c == '\'' || c == '"' || c == ','))
        .map(move |token| {
            if token.starts_with(&prefix) {
                &token[prefix.len()..]
            } else {
                token
            }
        })
}

/// The first `.img` path mentioned in an extraction command's output,
/// relative to `workdir`.
pub fn image_from_output(output: &str, workdir: &str) -> Option<String> {
    tokens(output, workdir)
        .find(|token| token.ends_with(".img"))
        .map(str::to_owned)
}

/// The top-level folder of the first nested path in an extraction output.
pub fn folder_from_output(output: &str, workdir: &str) -> Option<String> {
    tokens(output, workdir)
        .filter(|token| !token.starts_with('/'))
        .find_map(|token| {
            let mut parts = token.splitn(2, '/');
            match (parts.next(), parts.next()) {
                (Some(first), Some(_)) if !first.is_empty() && first != "." => {
                    Some(first.to_owned())
                }
                _ => None,
            }
        })
}

/// First `.img` file and first directory of an `ls -p` listing.
pub fn scan_listing(listing: &str) -> (Option<String>, Option<String>) {
    let entries: Vec<&str> = listing.lines().map(str::trim).collect();
    let image = entries
        .iter()
        .find(|entry| entry.ends_with(".img"))
        .map(|entry| entry.to_string());
    let folder = entries
        .iter()
        .find(|entry| entry.ends_with('/'))
        .map(|entry| entry.trim_end_matches('/').to_owned());
    (image, folder)
}

/// Name of the only entry of a zip archive, `None` for any other archive.
pub fn single_zip_entry(path: &Path) -> Option<String> {
    let entry = File::open(path)
        .map_err(Error::from)
        .and_then(|file| Ok(zip::ZipArchive::new(file)?))
        .and_then(|mut archive| {
            if archive.len() != 1 {
                return Ok(None);
            }
            let name = archive.by_index(0)?.name().to_owned();
            Ok(Some(name))
        });
    match entry {
        Ok(entry) => entry,
        Err(e) => {
            debug!("cannot inspect {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn detection_by_suffix() {
        assert_eq!(ArchiveKind::detect("a.img").unwrap(), ArchiveKind::Image);
        assert_eq!(ArchiveKind::detect("a.ZIP").unwrap(), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::detect("a.tar.gz").unwrap(), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::detect("a.tgz").unwrap(), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::detect("a.tar.bz2").unwrap(), ArchiveKind::TarBz2);
        assert_eq!(ArchiveKind::detect("a.tar.xz").unwrap(), ArchiveKind::TarXz);
        assert_eq!(ArchiveKind::detect("a.img.xz").unwrap(), ArchiveKind::Xz);
        assert_eq!(ArchiveKind::detect("a.7z").unwrap(), ArchiveKind::SevenZip);
        assert_eq!(ArchiveKind::detect("a.img.gz").unwrap(), ArchiveKind::Gz);
        assert!(matches!(
            ArchiveKind::detect("a.rar"),
            Err(Error::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn commands() {
        assert_eq!(ArchiveKind::Image.extract_command("/w/a.img", "/w"), None);
        assert_eq!(
            ArchiveKind::Zip.extract_command("/w/a.zip", "/w").unwrap(),
            "unzip -o /w/a.zip -d /w"
        );
        assert_eq!(
            ArchiveKind::TarBz2.extract_command("/w/a b.tar.bz2", "/w").unwrap(),
            "tar -xjvf '/w/a b.tar.bz2' -C /w"
        );
        assert_eq!(
            ArchiveKind::SevenZip.extract_command("/w/a.7z", "/w").unwrap(),
            "7z x -y -o/w /w/a.7z"
        );
    }

    #[test]
    fn crc_classifier() {
        let crc = Error::Remote {
            command: "unzip".into(),
            stderr: "unzip: CRC error in foo.img".into(),
        };
        let other = Error::Remote {
            command: "unzip".into(),
            stderr: "unzip: cannot find zipfile".into(),
        };
        assert!(is_crc_error(&crc));
        assert!(!is_crc_error(&other));
        assert!(!is_crc_error(&Error::ImageNotFound));
    }

    #[test]
    fn image_name_from_unzip_output() {
        let out = "Archive:  /root/images/raspbian.zip\n  inflating: /root/images/2019-04-08-raspbian.img  \n";
        assert_eq!(
            image_from_output(out, "/root/images").unwrap(),
            "2019-04-08-raspbian.img"
        );
    }

    #[test]
    fn image_name_from_tar_output() {
        let out = "nano/\nnano/boot.bin\nnano/rootfs.img\n";
        assert_eq!(image_from_output(out, "/w").unwrap(), "nano/rootfs.img");
        assert_eq!(folder_from_output(out, "/w").unwrap(), "nano");
        assert_eq!(image_from_output("nothing here", "/w"), None);
    }

    #[test]
    fn folder_from_unzip_output() {
        let out = "Archive:  /w/c.zip\n   creating: /w/Colibri_iMX6/\n  inflating: /w/Colibri_iMX6/update.sh\n";
        assert_eq!(folder_from_output(out, "/w").unwrap(), "Colibri_iMX6");
        assert_eq!(folder_from_output("inflating: /w/a.img", "/w"), None);
    }

    #[test]
    fn listing_scan() {
        let (image, folder) = scan_listing("a.zip\nColibri/\nb.img\nc.img\n");
        assert_eq!(image.unwrap(), "b.img");
        assert_eq!(folder.unwrap(), "Colibri");
        assert_eq!(scan_listing(""), (None, None));
    }

    #[test]
    fn zip_inspection() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.zip");
        let mut writer = zip::ZipWriter::new(File::create(&single).unwrap());
        writer
            .start_file("disk.img", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"data").unwrap();
        writer.finish().unwrap();
        assert_eq!(single_zip_entry(&single).unwrap(), "disk.img");

        let double = dir.path().join("double.zip");
        let mut writer = zip::ZipWriter::new(File::create(&double).unwrap());
        for name in &["a.img", "b.txt"] {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(single_zip_entry(&double), None);

        let garbage = dir.path().join("garbage.zip");
        std::fs::write(&garbage, b"not a zip").unwrap();
        assert_eq!(single_zip_entry(&garbage), None);
    }
}
