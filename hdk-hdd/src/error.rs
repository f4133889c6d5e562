//! Error types for HDD operations

use hdk_secure::SectorCipherError;
use thiserror::Error;

/// Main error type for device, partition and filesystem operations.
///
/// Filesystem variants carry the path (or a description of the structure)
/// that triggered them.
#[derive(Debug, Error)]
pub enum HddError {
    #[error("No PS3 partition table found: wrong keys or unsupported device")]
    WrongKey,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cryptographic operation failed: {0}")]
    Cipher(#[from] SectorCipherError),
    #[error("Invalid key material: {0}")]
    InvalidKeys(String),
    #[error("Volume {0} is not present on this device")]
    VolumeUnavailable(String),
    #[error("Out of range: {0}")]
    OutOfRange(String),
    #[error("No such file or directory: {0}")]
    NotFound(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Not a file: {0}")]
    NotAFile(String),
    #[error("Size mismatch for {path}: target is {expected} bytes, replacement is {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error("Too many levels of symbolic links: {0}")]
    RecursiveSymlink(String),
    #[error("Corrupt filesystem structure: {0}")]
    Corrupt(String),
}

impl HddError {
    pub(crate) fn corrupt(what: impl Into<String>) -> Self {
        Self::Corrupt(what.into())
    }
}
