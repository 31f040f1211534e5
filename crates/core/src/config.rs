//! modsync configuration file parsing (modsync.toml)

use std::path::Path;

use serde::Deserialize;

use crate::codegen::KeyShape;
use crate::error::SyncError;
use crate::hash::DEFAULT_CHUNK_SIZE;

/// Engine configuration, read from the data directory
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModsyncConfig {
    /// Shape of modpack codes
    pub code: KeyShape,

    /// Shape of user tokens
    pub token: KeyShape,

    /// Archive packaging settings
    pub archive: ArchiveConfig,

    /// Read size used when hashing uploads
    pub hash_buffer_size: usize,
}

/// Archive packaging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// gzip level, 0 (store) to 9 (best)
    pub compression_level: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
        }
    }
}

impl Default for ModsyncConfig {
    fn default() -> Self {
        Self {
            code: KeyShape::CODE,
            token: KeyShape::TOKEN,
            archive: ArchiveConfig::default(),
            hash_buffer_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Config file name
pub const CONFIG_FILE: &str = "modsync.toml";

impl ModsyncConfig {
    /// Load config from the data directory.
    ///
    /// Returns default config if modsync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read, parsed or
    /// describes unusable values.
    pub fn load(data_dir: &Path) -> Result<Self, SyncError> {
        let config_path = data_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                SyncError::Config(format!("{}: {e}", config_path.display()))
            })?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns `Config` naming the offending setting
    pub fn validate(&self) -> Result<(), SyncError> {
        self.code
            .validate()
            .map_err(|e| SyncError::Config(format!("code: {e}")))?;
        self.token
            .validate()
            .map_err(|e| SyncError::Config(format!("token: {e}")))?;
        if self.archive.compression_level > 9 {
            return Err(SyncError::Config(format!(
                "archive.compression_level must be 0-9, got {}",
                self.archive.compression_level
            )));
        }
        if self.hash_buffer_size == 0 {
            return Err(SyncError::Config(
                "hash_buffer_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
