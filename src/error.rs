//! Error types for cryptmirror
//!
//! Every filesystem operation returns [`Result`]; the FUSE adapter turns
//! failures into errno values with [`Error::to_errno`].

use crate::crypto::CryptoError;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Host filesystem call failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host call made through nix failed
    #[error("System call failed: {0}")]
    Nix(#[from] nix::Error),

    /// Cipher transform failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Bad command-line invocation or unusable mirror directory
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Configuration file could not be read or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Virtual path would resolve outside the mirror root
    #[error("Path escapes mirror root: {0}")]
    PathEscape(String),

    /// Entry name is not a single path component
    #[error("Invalid entry name: {0}")]
    InvalidName(String),

    /// Timestamp cannot be expressed on the host
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    /// Attempt to change an attribute owned by the filesystem
    #[error("Reserved attribute: {0}")]
    ReservedAttribute(String),

    /// Unknown inode number
    #[error("Inode not found: {0}")]
    NotFound(u64),
}

impl Error {
    /// Map to the negated-errno convention of the FUSE callback surface
    /// (returned positive; fuser negates it).
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Nix(errno) => *errno as i32,
            Error::Crypto(CryptoError::Io(e)) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Crypto(_) => libc::EIO,
            Error::Argument(_) | Error::InvalidName(_) | Error::InvalidTime(_) => libc::EINVAL,
            Error::Config(_) | Error::InvalidConfig(_) => libc::EINVAL,
            Error::PathEscape(_) => libc::EACCES,
            Error::ReservedAttribute(_) => libc::EPERM,
            Error::NotFound(_) => libc::ENOENT,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
