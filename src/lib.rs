//! cryptmirror - Transparent encrypting passthrough filesystem
//!
//! This library provides a FUSE filesystem that mirrors a host directory,
//! storing file contents encrypted under a passphrase-derived key while
//! presenting plaintext at the mount point.

pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod mount;

pub use config::Config;
pub use error::{Error, Result};
pub use mount::MountContext;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fs::{CryptMirror, CryptMirrorFs};
    pub use crate::mount::MountContext;
}
