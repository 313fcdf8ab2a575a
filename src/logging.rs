//! Logger setup: terminal output at the requested verbosity plus a debug-level
//! log file in the cache directory, read back by `iotflash log`.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use regex::Regex;
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use crate::error::{Error, Result};

const LOG_FILE: &str = "iotflash.log";

/// `psk="..."` lines of a wpa_supplicant configuration.
const PSK: &str = r#"(psk=)"[^"\n]*""#;
/// The passphrase argument of `AT+CWJAP="ssid","passphrase"`.
const AT_JOIN: &str = r#"(AT\+CWJAP="(?:[^"\\]|\\.)*",)"(?:[^"\\]|\\.)*""#;
const MASK: &str = r#"${1}"****""#;

pub fn log_file(cache: &Path) -> PathBuf {
    cache.join(LOG_FILE)
}

/// Maps the number of `-v` flags to a terminal log level.
pub fn level_for(occurrences: u64) -> LevelFilter {
    match occurrences {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(level: LevelFilter, cache: &Path) -> Result<()> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    // A read-only cache only costs us the log file.
    let file = fs::create_dir_all(cache).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file(cache))
    });
    if let Ok(file) = file {
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    CombinedLogger::init(loggers).map_err(|e| Error::Other(e.to_string()))
}

/// `text` with Wi-Fi passphrases masked, for logs and error messages. The
/// log file always records debug output.
pub fn redact(text: &str) -> String {
    [PSK, AT_JOIN]
        .iter()
        .fold(text.to_owned(), |text, pattern| match Regex::new(pattern) {
            Ok(re) => re.replace_all(&text, MASK).into_owned(),
            Err(_) => text,
        })
}
