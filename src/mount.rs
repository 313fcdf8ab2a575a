//! Mounting a partition of an extracted image inside the staging environment.
//!
//! The image is attached to [`LOOP_DEVICE`] with partition scanning. A known
//! partition suffix is mounted directly; otherwise every partition is tried in
//! listing order and the first one that looks like a Linux root wins. A
//! partition whose file system claims more blocks than the partition holds is
//! shrunk with `resize2fs` and mounted once more.
//!
//! The loop device is a per-run singleton: cleanup detaches every binding.

use log::{debug, info, warn};
use regex::Regex;

use crate::{
    error::{Error, Result},
    job,
    staging::{quote, MountState, StagingSession},
};

pub const LOOP_DEVICE: &str = "/dev/loop0";

const WRONG_FS_TYPE: &str = "wrong fs type, bad option, bad superblock";

// =============================================================================
// Public Interface
// =============================================================================

/// `true` when `mount` rejected the file system itself.
pub fn is_wrong_fs_type(err: &Error) -> bool {
    match err {
        Error::Remote { stderr, .. } => stderr.contains(WRONG_FS_TYPE),
        _ => false,
    }
}

/// Parse the kernel complaint about an oversized ext file system, returning
/// the file system's block count and the device's.
pub fn parse_block_count(line: &str) -> Option<(u64, u64)> {
    let re = Regex::new(r"block count (\d+) exceeds size of device \((\d+) blocks\)").ok()?;
    let caps = re.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// A mount point listing that contains `etc` or `opt`.
pub fn looks_like_root(listing: &str) -> bool {
    listing
        .split_whitespace()
        .any(|entry| matches!(entry.trim_end_matches('/'), "etc" | "opt"))
}

/// Loop partition nodes from `ls /dev/loop0p*`, in listing order.
pub fn loop_partitions(listing: &str) -> Vec<String> {
    let prefix = format!("{}p", LOOP_DEVICE);
    listing
        .split_whitespace()
        .filter(|node| node.starts_with(&prefix))
        .map(str::to_owned)
        .collect()
}

pub struct PartitionMounter<'a> {
    session: &'a mut StagingSession,
}

impl<'a> PartitionMounter<'a> {
    pub fn new(session: &'a mut StagingSession) -> Self {
        PartitionMounter { session }
    }

    /// Attach the extracted image and mount `partition` (a suffix such as
    /// `p2`), or the detected root partition when `partition` is `None`.
    ///
    /// Finding no root partition is not an error: the session's mount state
    /// stays [`MountState::Unattached`] and callers skip configuration.
    pub fn mount(&mut self, partition: Option<&str>) -> Result<()> {
        let image = self.session.image_path().ok_or(Error::ImageNotFound)?;
        let session = &mut *self.session;
        job::run_with_spinner("Mounting image", |handle| {
            handle.active(true);
            attach(session, &image)?;
            let mounted = match partition {
                Some(suffix) => mount_explicit(session, suffix),
                None => mount_detected(session),
            };
            if let Err(e) = &mounted {
                debug!("mount failed: {}", e);
                release(session);
            }
            mounted
        })
    }

    /// Unmount and detach. Does nothing unless something is mounted.
    pub fn unmount(&mut self) -> Result<()> {
        if self.session.mount == MountState::Unattached {
            debug!("nothing mounted");
            return Ok(());
        }
        let mount_point = quote(self.session.mount_point());
        self.session.exec(&format!("umount {}", mount_point))?;
        self.session.exec("losetup -D")?;
        self.session.mount = MountState::Unattached;
        info!("Image unmounted");
        Ok(())
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn attach(session: &mut StagingSession, image: &str) -> Result<()> {
    let mount_point = quote(session.mount_point());
    session.exec(&format!("mkdir -p {}", mount_point))?;
    session.exec(&format!("losetup -P {} {}", LOOP_DEVICE, quote(image)))?;
    Ok(())
}

/// Undo a partial mount: the loop device stays bound otherwise and the next
/// attach fails as busy.
fn release(session: &mut StagingSession) {
    let command = format!(
        "umount {} 2>/dev/null; losetup -d {}",
        quote(session.mount_point()),
        LOOP_DEVICE
    );
    if let Err(e) = session.exec(&command) {
        warn!("cannot detach {}: {}", LOOP_DEVICE, e);
    }
    session.mount = MountState::Unattached;
}

fn mount_command(session: &StagingSession, node: &str) -> String {
    format!("mount {} {}", node, quote(session.mount_point()))
}

fn mount_explicit(session: &mut StagingSession, suffix: &str) -> Result<()> {
    let node = format!("{}{}", LOOP_DEVICE, suffix);
    let command = mount_command(session, &node);
    session.exec(&command)?;
    session.mount = MountState::Attached;
    info!("Mounted {} on {}", node, session.mount_point());
    Ok(())
}

fn mount_detected(session: &mut StagingSession) -> Result<()> {
    // An image without a partition table has no partition nodes at all.
    let listing = match session.exec(&format!("ls {}p*", LOOP_DEVICE)) {
        Ok(listing) => listing,
        Err(Error::Remote { ref stderr, .. }) if stderr.contains("No such file") => String::new(),
        Err(e) => return Err(e),
    };
    let mount_point = quote(session.mount_point());

    for node in loop_partitions(&listing) {
        if !try_mount(session, &node)? {
            continue;
        }
        let contents = session.exec(&format!("ls {}", mount_point))?;
        if looks_like_root(&contents) {
            session.mount = MountState::Attached;
            info!("Mounted root partition {} on {}", node, session.mount_point());
            return Ok(());
        }
        debug!("{} is not a root partition", node);
        session.exec(&format!("umount {}", mount_point))?;
    }

    warn!("no linux root partition found");
    session.exec(&format!("losetup -d {}", LOOP_DEVICE))?;
    Ok(())
}

/// Mount `node`, repairing an oversized file system once. `Ok(false)` means
/// this partition cannot be mounted and the next one should be tried.
fn try_mount(session: &mut StagingSession, node: &str) -> Result<bool> {
    let command = mount_command(session, node);
    match session.exec(&command) {
        Ok(_) => Ok(true),
        Err(e) if is_wrong_fs_type(&e) => {
            let last = session.exec("dmesg | tail -n 1")?;
            match parse_block_count(&last) {
                Some((blocks, device_blocks)) => {
                    info!(
                        "Resizing the file system on {} from {} to {} blocks",
                        node, blocks, device_blocks
                    );
                    resize(session, node, device_blocks)?;
                    match session.exec(&command) {
                        Ok(_) => Ok(true),
                        Err(e @ Error::Remote { .. }) => {
                            debug!("{} still cannot be mounted: {}", node, e);
                            Ok(false)
                        }
                        Err(e) => Err(e),
                    }
                }
                None => {
                    debug!("{}: {}", node, e);
                    Ok(false)
                }
            }
        }
        Err(e @ Error::Remote { .. }) => {
            debug!("{}: {}", node, e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn resize(session: &mut StagingSession, node: &str, blocks: u64) -> Result<()> {
    // Both tools report progress on stderr.
    session.exec("apt-get install -y e2fsprogs 2>&1")?;
    session.exec(&format!("resize2fs -f {} {} 2>&1", node, blocks))?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{staging::CommandOutput, testing::FakeBackend};

    fn session(backend: &FakeBackend) -> StagingSession {
        let mut session =
            StagingSession::new(Box::new(backend.clone()), "nano-pi", "/w", "/mnt/image");
        session.image = Some("nanopi.img".into());
        session
    }

    #[test]
    fn classifiers() {
        let wrong = Error::Remote {
            command: "mount".into(),
            stderr: "mount: /mnt/image: wrong fs type, bad option, bad superblock on /dev/loop0p2, missing codepage or helper program, or other error.".into(),
        };
        assert!(is_wrong_fs_type(&wrong));
        assert!(!is_wrong_fs_type(&Error::ImageNotFound));

        assert_eq!(
            parse_block_count("[  12.3] EXT4-fs (loop0p2): bad geometry: block count 5000 exceeds size of device (4000 blocks)"),
            Some((5000, 4000))
        );
        assert_eq!(parse_block_count("EXT4-fs (loop0p2): mounted filesystem"), None);

        assert!(looks_like_root("bin\nboot\netc\nhome"));
        assert!(looks_like_root("opt/ lost+found/"));
        assert!(!looks_like_root("cmdline.txt config.txt overlays"));

        assert_eq!(
            loop_partitions("/dev/loop0p1  /dev/loop0p2\n"),
            vec!["/dev/loop0p1", "/dev/loop0p2"]
        );
    }

    #[test]
    fn missing_image_fails_fast() {
        let backend = FakeBackend::new();
        let mut session = session(&backend);
        session.image = None;
        assert!(matches!(
            PartitionMounter::new(&mut session).mount(Some("p2")),
            Err(Error::ImageNotFound)
        ));
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn explicit_partition_is_the_only_candidate() {
        let backend = FakeBackend::new();
        let mut session = session(&backend);
        PartitionMounter::new(&mut session).mount(Some("p2")).unwrap();

        assert_eq!(
            backend.commands(),
            vec![
                "mkdir -p /mnt/image",
                "losetup -P /dev/loop0 /w/nanopi.img",
                "mount /dev/loop0p2 /mnt/image",
            ]
        );
        assert_eq!(session.mount, MountState::Attached);
    }

    #[test]
    fn failed_explicit_mount_detaches_the_image() {
        let backend = FakeBackend::new();
        backend.respond(
            "mount /dev/loop0p2",
            CommandOutput::stderr("mount: /mnt/image: special device /dev/loop0p2 does not exist."),
        );
        let mut session = session(&backend);
        assert!(matches!(
            PartitionMounter::new(&mut session).mount(Some("p2")),
            Err(Error::Remote { .. })
        ));

        assert_eq!(session.mount, MountState::Unattached);
        assert_eq!(
            backend.commands().last().map(String::as_str),
            Some("umount /mnt/image 2>/dev/null; losetup -d /dev/loop0")
        );
    }

    #[test]
    fn lost_connection_while_scanning_detaches_the_image() {
        let backend = FakeBackend::new();
        backend.respond("ls /dev/loop0p*", CommandOutput::stdout("/dev/loop0p1"));
        backend.fail_transport("ls /mnt/image");
        let mut session = session(&backend);
        assert!(matches!(
            PartitionMounter::new(&mut session).mount(None),
            Err(Error::Transport(_))
        ));
        assert!(backend.ran("losetup -d /dev/loop0"));
        assert_eq!(session.mount, MountState::Unattached);
    }

    #[test]
    fn image_without_partitions_is_not_an_error() {
        let backend = FakeBackend::new();
        backend.respond(
            "ls /dev/loop0p*",
            CommandOutput::stderr("ls: cannot access '/dev/loop0p*': No such file or directory"),
        );
        let mut session = session(&backend);
        PartitionMounter::new(&mut session).mount(None).unwrap();

        assert_eq!(session.mount, MountState::Unattached);
        assert!(!backend.ran("mount /dev/loop0p"));
        assert!(backend.ran("losetup -d /dev/loop0"));
    }

    #[test]
    fn first_root_partition_wins() {
        let backend = FakeBackend::new();
        backend.respond("ls /dev/loop0p*", CommandOutput::stdout("/dev/loop0p1\n/dev/loop0p2\n/dev/loop0p3\n"));
        backend.respond_sequence(
            "ls /mnt/image",
            vec![
                CommandOutput::stdout("boot.scr\nzImage\n"),
                CommandOutput::stdout("bin\netc\nusr\n"),
            ],
        );
        let mut session = session(&backend);
        PartitionMounter::new(&mut session).mount(None).unwrap();

        assert_eq!(session.mount, MountState::Attached);
        assert!(backend.ran("mount /dev/loop0p1 /mnt/image"));
        assert!(backend.ran("mount /dev/loop0p2 /mnt/image"));
        assert!(!backend.ran("mount /dev/loop0p3"));
        assert_eq!(backend.count("umount /mnt/image"), 1);
    }

    #[test]
    fn no_root_partition_is_not_an_error() {
        let backend = FakeBackend::new();
        backend.respond("ls /dev/loop0p*", CommandOutput::stdout("/dev/loop0p1 /dev/loop0p2"));
        backend.respond("ls /mnt/image", CommandOutput::stdout("overlays\nkernel.img\n"));
        let mut session = session(&backend);
        PartitionMounter::new(&mut session).mount(None).unwrap();

        assert_eq!(session.mount, MountState::Unattached);
        assert_eq!(backend.count("umount /mnt/image"), 2);
    }

    #[test]
    fn unmountable_partitions_are_skipped() {
        let backend = FakeBackend::new();
        backend.respond("ls /dev/loop0p*", CommandOutput::stdout("/dev/loop0p1 /dev/loop0p2"));
        backend.respond(
            "mount /dev/loop0p1",
            CommandOutput::stderr("mount: unknown filesystem type 'swap'"),
        );
        backend.respond("ls /mnt/image", CommandOutput::stdout("etc"));
        let mut session = session(&backend);
        PartitionMounter::new(&mut session).mount(None).unwrap();

        assert_eq!(session.mount, MountState::Attached);
        assert!(!backend.ran("dmesg"));
    }

    #[test]
    fn oversized_file_system_is_resized_and_mounted_again() {
        let backend = FakeBackend::new();
        backend.respond("ls /dev/loop0p*", CommandOutput::stdout("/dev/loop0p1"));
        backend.respond_sequence(
            "mount /dev/loop0p1",
            vec![
                CommandOutput::stderr(
                    "mount: /mnt/image: wrong fs type, bad option, bad superblock on /dev/loop0p1",
                ),
                CommandOutput::default(),
            ],
        );
        backend.respond(
            "dmesg",
            CommandOutput::stdout(
                "EXT4-fs (loop0p1): bad geometry: block count 5000 exceeds size of device (4000 blocks)",
            ),
        );
        backend.respond("ls /mnt/image", CommandOutput::stdout("etc opt"));
        let mut session = session(&backend);
        PartitionMounter::new(&mut session).mount(None).unwrap();

        assert!(backend.ran("resize2fs -f /dev/loop0p1 4000"));
        assert_eq!(backend.count("mount /dev/loop0p1 /mnt/image"), 2);
        assert_eq!(session.mount, MountState::Attached);
    }

    #[test]
    fn unmount_is_a_no_op_when_nothing_is_mounted() {
        let backend = FakeBackend::new();
        let mut session = session(&backend);
        PartitionMounter::new(&mut session).unmount().unwrap();
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn unmount_detaches_everything() {
        let backend = FakeBackend::new();
        let mut session = session(&backend);
        session.mount = MountState::Attached;
        PartitionMounter::new(&mut session).unmount().unwrap();
        assert_eq!(backend.commands(), vec!["umount /mnt/image", "losetup -D"]);
        assert_eq!(session.mount, MountState::Unattached);
    }
}
