//! Configuration management for cryptmirror

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Passphrase bytes kept by the fixed-length policy
pub const DEFAULT_MAX_PASSPHRASE_LEN: usize = 80;

/// Default attribute/entry cache TTL handed to the kernel
pub const DEFAULT_ATTR_TTL_SECS: u64 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Encryption configuration
    pub encryption: EncryptionConfig,

    /// Mount configuration
    pub mount: MountConfig,

    /// Directory for scratch copies (system temp dir if unset)
    pub scratch_dir: Option<PathBuf>,
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,

    /// Salt for key derivation (built-in salt if empty)
    #[serde(with = "hex_serde")]
    pub salt: Vec<u8>,

    /// Truncate passphrases to this many bytes; `None` keeps them whole
    pub max_passphrase_len: Option<usize>,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Filesystem name reported to the kernel
    pub fs_name: String,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Unmount automatically when the process exits
    pub auto_unmount: bool,

    /// Attribute cache TTL in seconds
    pub attr_ttl_secs: u64,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            argon2_memory_kib: 19456, // 19 MiB
            argon2_iterations: 2,
            argon2_parallelism: 1,
            salt: Vec::new(),
            max_passphrase_len: Some(DEFAULT_MAX_PASSPHRASE_LEN),
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            fs_name: "cryptmirror".to_string(),
            allow_other: false,
            auto_unmount: true,
            attr_ttl_secs: DEFAULT_ATTR_TTL_SECS,
        }
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cryptmirror")
            .join("config.json")
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults (plus env overrides) otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CRYPTMIRROR_SCRATCH_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.scratch_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(len) = std::env::var("CRYPTMIRROR_MAX_PASSPHRASE_LEN") {
            match len.trim() {
                "none" | "unlimited" => self.encryption.max_passphrase_len = None,
                other => {
                    if let Ok(n) = other.parse::<usize>() {
                        self.encryption.max_passphrase_len = Some(n);
                    }
                }
            }
        }

        if let Ok(mem) = std::env::var("CRYPTMIRROR_ARGON2_MEMORY_KIB") {
            if let Ok(kib) = mem.trim().parse::<u32>() {
                self.encryption.argon2_memory_kib = kib;
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.encryption.max_passphrase_len == Some(0) {
            return Err(Error::InvalidConfig(
                "Passphrase length limit must be greater than 0".to_string(),
            ));
        }

        if self.encryption.argon2_iterations == 0 || self.encryption.argon2_parallelism == 0 {
            return Err(Error::InvalidConfig(
                "Argon2 iterations and parallelism must be greater than 0".to_string(),
            ));
        }

        if !self.encryption.salt.is_empty()
            && self.encryption.salt.len() < crate::crypto::SALT_SIZE
        {
            return Err(Error::InvalidConfig(format!(
                "Salt must be at least {} bytes",
                crate::crypto::SALT_SIZE
            )));
        }

        if let Some(dir) = &self.scratch_dir {
            if !dir.is_dir() {
                return Err(Error::InvalidConfig(format!(
                    "Scratch directory {:?} does not exist",
                    dir
                )));
            }
        }

        Ok(())
    }
}

/// Hex serialization for byte arrays
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
