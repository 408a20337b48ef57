//! Key derivation using Argon2id
//!
//! The mount passphrase is digested once, at mount time, into the AES key
//! used for every file on the mirror.

use super::{CryptoError, KEY_SIZE, SALT_SIZE};
use crate::config::EncryptionConfig;
use argon2::{Algorithm, Argon2, Params, Version};
use std::fmt;
use zeroize::Zeroizing;

/// Salt used when the configuration does not provide one.
///
/// Fixed so that a passphrase always maps to the same key for a mirror.
pub const DEFAULT_SALT: &[u8] = b"cryptmirror/v1/passphrase-salt!!";

/// Derived file encryption key (zeroized on drop)
#[derive(Clone)]
pub struct FileKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl FileKey {
    /// Wrap raw key material
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(bytes),
        }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileKey(..)")
    }
}

/// Apply the passphrase length policy.
///
/// `Some(n)` keeps at most `n` bytes, like the fixed-size copy of older
/// mount tools; `None` uses the passphrase as given.
pub fn apply_passphrase_limit(passphrase: &[u8], limit: Option<usize>) -> &[u8] {
    match limit {
        Some(max) if passphrase.len() > max => &passphrase[..max],
        _ => passphrase,
    }
}

/// Derive the file key from a passphrase using Argon2id
///
/// # Arguments
/// * `passphrase` - The passphrase, after the length policy was applied
/// * `config` - Encryption configuration with Argon2 parameters and salt
pub fn derive_key(passphrase: &[u8], config: &EncryptionConfig) -> Result<FileKey, CryptoError> {
    let salt: &[u8] = if config.salt.is_empty() {
        DEFAULT_SALT
    } else if config.salt.len() < SALT_SIZE {
        return Err(CryptoError::KeyDerivation(format!(
            "Salt too short: {} bytes, need {}",
            config.salt.len(),
            SALT_SIZE
        )));
    } else {
        &config.salt
    };

    let params = Params::new(
        config.argon2_memory_kib,
        config.argon2_iterations,
        config.argon2_parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key_bytes = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase, salt, key_bytes.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(format!("Key derivation failed: {}", e)))?;

    Ok(FileKey { key: key_bytes })
}
