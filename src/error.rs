//! Error type shared by every `iotflash` operation.
//!
//! Errors coming from remote tools are kept as the plain text those tools
//! printed. The few recovery paths that depend on that text go through the
//! classifier functions next to the code that uses them (see
//! [`image::is_crc_error`](crate::image::is_crc_error) and
//! [`mount::is_wrong_fs_type`](crate::mount::is_wrong_fs_type)).

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid image location: {0}")]
    InvalidImageLocation(String),

    #[error("image not found")]
    ImageNotFound,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// A remote command completed but wrote to its standard error.
    #[error("{command}: {stderr}")]
    Remote { command: String, stderr: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("operation declined by user")]
    Declined,

    #[error("giving up after {attempts} attempts: {what}")]
    RetriesExhausted { what: String, attempts: u32 },

    #[error("background job ended without reporting its outcome")]
    JobAbandoned,

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Checksum {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code the CLI uses when this error terminates a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Declined => 0,
            Error::RetriesExhausted { .. } => 3,
            _ => 1,
        }
    }
}
