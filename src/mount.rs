//! Mount context
//!
//! Built once before mounting and shared read-only (behind an `Arc`) by
//! every operation handler.

use crate::config::Config;
use crate::crypto::{apply_passphrase_limit, derive_key, FileKey};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Immutable per-mount state
#[derive(Debug)]
pub struct MountContext {
    /// Canonical absolute mirror root
    mirror_root: PathBuf,
    /// Key derived from the passphrase
    key: FileKey,
    /// Where scratch copies are created
    scratch_dir: Option<PathBuf>,
    /// Kernel attribute cache TTL
    attr_ttl: Duration,
}

impl MountContext {
    /// Validate the mirror directory and derive the file key.
    ///
    /// The mirror directory is canonicalized; a path that cannot be
    /// resolved or is not a directory is an argument error.
    pub fn new(passphrase: &[u8], mirror_dir: &Path, config: &Config) -> Result<Self> {
        let mirror_root = std::fs::canonicalize(mirror_dir).map_err(|e| {
            Error::Argument(format!(
                "cannot resolve mirror directory {:?}: {}",
                mirror_dir, e
            ))
        })?;
        if !mirror_root.is_dir() {
            return Err(Error::Argument(format!(
                "mirror path {:?} is not a directory",
                mirror_root
            )));
        }

        let limit = config.encryption.max_passphrase_len;
        let effective = apply_passphrase_limit(passphrase, limit);
        if effective.len() < passphrase.len() {
            info!(
                "Passphrase truncated to {} bytes by the configured limit",
                effective.len()
            );
        }

        debug!("Deriving file key for mirror {:?}", mirror_root);
        let key = derive_key(effective, &config.encryption)?;

        Ok(Self {
            mirror_root,
            key,
            scratch_dir: config.scratch_dir.clone(),
            attr_ttl: Duration::from_secs(config.mount.attr_ttl_secs),
        })
    }

    /// Absolute mirror root
    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// File encryption key
    pub fn key(&self) -> &FileKey {
        &self.key
    }

    /// Scratch directory, if configured
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    /// Attribute cache TTL
    pub fn attr_ttl(&self) -> Duration {
        self.attr_ttl
    }
}
