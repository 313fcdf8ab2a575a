//! Recording fakes for the workflow's collaborators. Test builds only.

use std::{
    collections::VecDeque,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tempfile::TempDir;

use crate::{
    configure::{AddressProbe, ConfigTarget},
    devices,
    dialog::Dialog,
    error::{Error, Result},
    flasher::FlashContext,
    manifest::{self, DeviceProfile, ImageEntry},
    repository::{Fetcher, GenericRepository},
    staging::{CommandOutput, StagingBackend, StagingSession},
    workstation::{Disk, WorkStation},
    Settings, SettingsBuilder,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Staging backend
// =============================================================================

#[derive(Default)]
struct BackendState {
    commands: Vec<String>,
    /// Replies per command substring; the last reply of a queue repeats.
    replies: Vec<(String, VecDeque<CommandOutput>)>,
    broken: Vec<String>,
    uploads: Vec<(PathBuf, String)>,
    downloads: Vec<(String, PathBuf)>,
    starts: usize,
    stops: usize,
}

/// A staging backend answering from a script. Clones share their state, so
/// a test keeps one clone to inspect what the workflow did with the other.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Default::default()
    }

    /// Queue `output` for commands containing `pattern`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        let mut state = lock(&self.state);
        match state.replies.iter().position(|(p, _)| p == pattern) {
            Some(index) => state.replies[index].1.push_back(output),
            None => state
                .replies
                .push((pattern.to_owned(), VecDeque::from(vec![output]))),
        }
    }

    /// Answer every command containing `pattern` with `output`.
    pub fn respond_always(&self, pattern: &str, output: CommandOutput) {
        let mut state = lock(&self.state);
        state.replies.retain(|(p, _)| p != pattern);
        state
            .replies
            .push((pattern.to_owned(), VecDeque::from(vec![output])));
    }

    pub fn respond_sequence(&self, pattern: &str, outputs: Vec<CommandOutput>) {
        for output in outputs {
            self.respond(pattern, output);
        }
    }

    /// Fail commands containing `pattern` at the transport level.
    pub fn fail_transport(&self, pattern: &str) {
        lock(&self.state).broken.push(pattern.to_owned());
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    pub fn count(&self, pattern: &str) -> usize {
        lock(&self.state)
            .commands
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        lock(&self.state).uploads.clone()
    }

    pub fn downloads(&self) -> Vec<(String, PathBuf)> {
        lock(&self.state).downloads.clone()
    }

    pub fn starts(&self) -> usize {
        lock(&self.state).starts
    }

    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }
}

impl StagingBackend for FakeBackend {
    fn start(&mut self) -> Result<()> {
        lock(&self.state).starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        lock(&self.state).stops += 1;
        Ok(())
    }

    fn run(&mut self, command: &str, _: Duration) -> Result<CommandOutput> {
        let mut state = lock(&self.state);
        state.commands.push(command.to_owned());
        if state.broken.iter().any(|p| command.contains(p.as_str())) {
            return Err(Error::Transport(format!("connection lost running {}", command)));
        }
        let reply = state
            .replies
            .iter_mut()
            .find(|(p, _)| command.contains(p.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
        Ok(reply.unwrap_or_default())
    }

    fn scp(&mut self, src: &Path, dst: &str) -> Result<()> {
        lock(&self.state)
            .uploads
            .push((src.to_owned(), dst.to_owned()));
        Ok(())
    }

    fn scp_from(&mut self, src: &str, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dst, b"image")?;
        lock(&self.state)
            .downloads
            .push((src.to_owned(), dst.to_owned()));
        Ok(())
    }
}

// =============================================================================
// Downloads
// =============================================================================

/// "Downloads" by writing a small file where the real file would go.
#[derive(Default)]
pub struct FakeFetcher {
    fetches: AtomicUsize,
    zip_entries: Option<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Default::default()
    }

    /// "Downloads" a zip archive holding empty `entries`.
    pub fn serving_zip(entries: &[&str]) -> Self {
        FakeFetcher {
            fetches: AtomicUsize::new(0),
            zip_entries: Some(entries.iter().map(|e| e.to_string()).collect()),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, repo: &GenericRepository) -> Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(repo.dir())?;
        let path = repo.path();
        match &self.zip_entries {
            Some(entries) => {
                let entries: Vec<&str> = entries.iter().map(String::as_str).collect();
                write_zip(&path, &entries);
            }
            None => fs::write(&path, b"downloaded")?,
        }
        Ok(path)
    }
}

/// Write a zip archive at `path` holding empty `entries`.
pub fn write_zip(path: &Path, entries: &[&str]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for entry in entries {
        writer
            .start_file(*entry, zip::write::FileOptions::default())
            .unwrap();
    }
    writer.finish().unwrap();
}

// =============================================================================
// Dialog
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Confirm(bool),
    Select(usize),
    Input(String),
    Password(Vec<u8>),
}

/// Answers questions from a script. Once the script is exhausted every
/// question gets its default answer.
#[derive(Clone, Default)]
pub struct ScriptedDialog {
    answers: Arc<Mutex<VecDeque<Answer>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDialog {
    pub fn new(answers: Vec<Answer>) -> Self {
        ScriptedDialog {
            answers: Arc::new(Mutex::new(answers.into())),
            prompts: Default::default(),
        }
    }

    /// How many questions were asked.
    pub fn asked(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    fn next(&mut self, prompt: &str) -> Option<Answer> {
        lock(&self.prompts).push(prompt.to_owned());
        lock(&self.answers).pop_front()
    }
}

impl Dialog for ScriptedDialog {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        match self.next(prompt) {
            Some(Answer::Confirm(answer)) => Ok(answer),
            None => Ok(default),
            Some(other) => panic!("`{}` answered with {:?}", prompt, other),
        }
    }

    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize> {
        match self.next(prompt) {
            Some(Answer::Select(index)) if index < items.len() => Ok(index),
            Some(Answer::Select(_)) => Err(Error::Declined),
            None => Ok(default),
            Some(other) => panic!("`{}` answered with {:?}", prompt, other),
        }
    }

    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        match self.next(prompt) {
            Some(Answer::Input(answer)) => Ok(answer),
            None => Ok(default.unwrap_or_default().to_owned()),
            Some(other) => panic!("`{}` answered with {:?}", prompt, other),
        }
    }

    fn password(&mut self, prompt: &str) -> Result<Vec<u8>> {
        match self.next(prompt) {
            Some(Answer::Password(answer)) => Ok(answer),
            None => Ok(Vec::new()),
            Some(other) => panic!("`{}` answered with {:?}", prompt, other),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Default)]
pub struct FakeProbe {
    alive: Vec<String>,
    probed: Mutex<Vec<String>>,
}

impl FakeProbe {
    /// Nobody answers.
    pub fn none() -> Self {
        Default::default()
    }

    pub fn alive(addresses: &[&str]) -> Self {
        FakeProbe {
            alive: addresses.iter().map(|a| a.to_string()).collect(),
            probed: Default::default(),
        }
    }

    pub fn probed(&self) -> Vec<String> {
        lock(&self.probed).clone()
    }
}

impl AddressProbe for FakeProbe {
    fn is_alive(&self, address: &str) -> bool {
        lock(&self.probed).push(address.to_owned());
        self.alive.iter().any(|a| a == address)
    }
}

/// Records what configuration would be written.
#[derive(Default)]
pub struct RecordingTarget {
    pub writes: Vec<(String, String)>,
    pub appends: Vec<(String, String)>,
    pub commands: Vec<String>,
    failing: bool,
}

impl RecordingTarget {
    /// Records the first write, then fails it.
    pub fn failing() -> Self {
        RecordingTarget {
            failing: true,
            ..Default::default()
        }
    }

    pub fn is_untouched(&self) -> bool {
        self.writes.is_empty() && self.appends.is_empty() && self.commands.is_empty()
    }

    fn outcome(&self) -> Result<()> {
        if self.failing {
            Err(Error::Other("read-only file system".into()))
        } else {
            Ok(())
        }
    }
}

impl ConfigTarget for RecordingTarget {
    fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.writes.push((path.to_owned(), content.to_owned()));
        self.outcome()
    }

    fn append_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.appends.push((path.to_owned(), content.to_owned()));
        self.outcome()
    }

    fn run(&mut self, command: &str) -> Result<String> {
        self.commands.push(command.to_owned());
        self.outcome().map(|_| String::new())
    }
}

// =============================================================================
// Workstation
// =============================================================================

#[derive(Default)]
struct WorkStationState {
    writes: Vec<(PathBuf, String)>,
    unmounts: usize,
    ejects: usize,
    cleans: usize,
    tools: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeWorkStation {
    disks: Vec<Disk>,
    state: Arc<Mutex<WorkStationState>>,
}

impl FakeWorkStation {
    pub fn with_disks(disks: Vec<Disk>) -> Self {
        FakeWorkStation {
            disks,
            state: Default::default(),
        }
    }

    /// Images written, with the path of the disk they went to.
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        lock(&self.state).writes.clone()
    }

    pub fn ejects(&self) -> usize {
        lock(&self.state).ejects
    }

    pub fn unmounts(&self) -> usize {
        lock(&self.state).unmounts
    }

    pub fn cleans(&self) -> usize {
        lock(&self.state).cleans
    }

    /// Vendor tool command lines, space separated.
    pub fn tools(&self) -> Vec<String> {
        lock(&self.state).tools.clone()
    }
}

impl WorkStation for FakeWorkStation {
    fn list_removable_disks(&self) -> Result<Vec<Disk>> {
        Ok(self.disks.clone())
    }

    fn write_to_disk(&self, image: &Path, disk: &Disk) -> Result<()> {
        lock(&self.state)
            .writes
            .push((image.to_owned(), disk.path.clone()));
        Ok(())
    }

    fn unmount(&self, _: &Disk) -> Result<()> {
        lock(&self.state).unmounts += 1;
        Ok(())
    }

    fn eject(&self, _: &Disk) -> Result<()> {
        lock(&self.state).ejects += 1;
        Ok(())
    }

    fn clean_disk(&self, _: &Disk) -> Result<()> {
        lock(&self.state).cleans += 1;
        Ok(())
    }

    fn run_tool(&self, program: &str, args: &[&str]) -> Result<String> {
        let mut line = vec![program];
        line.extend_from_slice(args);
        lock(&self.state).tools.push(line.join(" "));
        Ok(String::new())
    }
}

pub fn usb_stick() -> Disk {
    Disk {
        name: "sdb".into(),
        path: "/dev/sdb".into(),
        size: 16_000_000_000,
        model: "Cruzer Blade".into(),
    }
}

// =============================================================================
// Serial port
// =============================================================================

#[derive(Default)]
struct PortState {
    input: VecDeque<u8>,
    written: Vec<u8>,
    replies: Vec<(String, String)>,
}

/// A serial port fed from a script. Writes containing a trigger queue the
/// matching reply as device output.
#[derive(Clone, Default)]
pub struct FakePort {
    state: Arc<Mutex<PortState>>,
}

impl FakePort {
    pub fn new(output: &str) -> Self {
        let port = FakePort::default();
        port.feed(output);
        port
    }

    /// Make the device print `text`.
    pub fn feed(&self, text: &str) {
        lock(&self.state).input.extend(text.bytes());
    }

    pub fn reply(&self, trigger: &str, reply: &str) {
        lock(&self.state)
            .replies
            .push((trigger.to_owned(), reply.to_owned()));
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&lock(&self.state).written).into_owned()
    }
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        state.written.extend_from_slice(buf);
        let text = String::from_utf8_lossy(buf).into_owned();
        let replies: Vec<String> = state
            .replies
            .iter()
            .filter(|(trigger, _)| text.contains(trigger.as_str()))
            .map(|(_, reply)| reply.clone())
            .collect();
        for reply in replies {
            state.input.extend(reply.bytes());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Flashing runs
// =============================================================================

/// Everything a flashing run borrows, faked, for a device of the embedded
/// manifest. Tweak the fields, then build the run's context.
pub struct Fixture {
    pub settings: Settings,
    pub profile: DeviceProfile,
    pub image: ImageEntry,
    pub cache: TempDir,
    pub dialog: ScriptedDialog,
    pub workstation: FakeWorkStation,
    pub fetcher: FakeFetcher,
    pub probe: FakeProbe,
    pub backend: FakeBackend,
}

impl Fixture {
    pub fn new(device: &str) -> Self {
        Fixture::with_settings(device, SettingsBuilder::new().finalize())
    }

    pub fn with_settings(device: &str, settings: Settings) -> Self {
        let profile = manifest::embedded()
            .unwrap()
            .find(device)
            .unwrap_or_else(|| panic!("{} is not in the manifest", device))
            .clone();
        let image = profile
            .default_image()
            .cloned()
            .unwrap_or_else(|| ImageEntry::custom("/images/custom.img", None));
        Fixture {
            settings,
            profile,
            image,
            cache: tempfile::tempdir().unwrap(),
            dialog: ScriptedDialog::default(),
            workstation: FakeWorkStation::with_disks(vec![usb_stick()]),
            fetcher: FakeFetcher::new(),
            probe: FakeProbe::none(),
            backend: FakeBackend::new(),
        }
    }

    pub fn context(&mut self) -> FlashContext<'_> {
        let staging = if devices::needs_staging(self.profile.family) {
            Some(StagingSession::new(
                Box::new(self.backend.clone()),
                &self.profile.name,
                "/w",
                "/mnt/image",
            ))
        } else {
            None
        };
        FlashContext {
            settings: &self.settings,
            profile: self.profile.clone(),
            image: self.image.clone(),
            cache_dir: self.cache.path().to_owned(),
            dialog: &mut self.dialog,
            workstation: &self.workstation,
            fetcher: &self.fetcher,
            probe: &self.probe,
            staging,
            configurator: devices::configurator(self.profile.family),
            local_image: None,
            port: None,
            console: None,
        }
    }
}
