//! Cryptography module for cryptmirror
//!
//! Provides whole-file AES-256-GCM transcoding keyed by an Argon2id
//! digest of the mount passphrase.

mod cipher;
mod kdf;

pub use cipher::{plaintext_len, transcode, CryptoError, TranscodeMode, MAGIC};
pub use kdf::{apply_passphrase_limit, derive_key, FileKey, DEFAULT_SALT};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Minimum salt size accepted for key derivation
pub const SALT_SIZE: usize = 16;

/// Bytes added to every encrypted file (magic, nonce, tag)
pub const OVERHEAD: usize = MAGIC.len() + NONCE_SIZE + TAG_SIZE;
