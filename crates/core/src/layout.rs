//! On-disk layout of the modpack store
//!
//! ```text
//! <root>/<code>/info.json     manifest
//! <root>/<code>/mods/...
//! <root>/<code>/config/...
//! <root>/<code>/lock          present iff locked
//! <root>/<code>.tar.gz        packaged archive
//! ```

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::SyncError;
use crate::path::STAGING_PREFIX;

/// Manifest file name inside a modpack directory
pub const MANIFEST_FILE: &str = "info.json";

/// Lock marker file name inside a modpack directory
pub const LOCK_FILE: &str = "lock";

/// Archive file extension
pub const ARCHIVE_EXT: &str = "tar.gz";

/// Resolves modpack codes to paths under the store root
#[derive(Debug, Clone)]
pub struct ModpackLayout {
    root: PathBuf,
}

impl ModpackLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one modpack.
    ///
    /// Codes must be a single path segment of ASCII alphanumerics, `-` or
    /// `_`; anything else cannot name a modpack and is reported as
    /// `NotFound`.
    ///
    /// # Errors
    /// Returns `NotFound` for malformed codes
    pub fn modpack_dir(&self, code: &str) -> Result<PathBuf, SyncError> {
        let valid = !code.is_empty()
            && code
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(self.root.join(code))
        } else {
            Err(SyncError::NotFound(code.to_string()))
        }
    }

    /// # Errors
    /// Returns `NotFound` for malformed codes
    pub fn manifest_path(&self, code: &str) -> Result<PathBuf, SyncError> {
        Ok(self.modpack_dir(code)?.join(MANIFEST_FILE))
    }

    /// # Errors
    /// Returns `NotFound` for malformed codes
    pub fn lock_path(&self, code: &str) -> Result<PathBuf, SyncError> {
        Ok(self.modpack_dir(code)?.join(LOCK_FILE))
    }

    /// Whether the lock marker of `code` is present.
    ///
    /// # Errors
    /// Returns `NotFound` for malformed codes
    pub fn is_locked(&self, code: &str) -> Result<bool, SyncError> {
        Ok(self.lock_path(code)?.is_file())
    }

    /// # Errors
    /// Returns `NotFound` for malformed codes
    pub fn archive_path(&self, code: &str) -> Result<PathBuf, SyncError> {
        self.modpack_dir(code)?;
        Ok(self.root.join(format!("{code}.{ARCHIVE_EXT}")))
    }

    /// Whether a modpack directory exists for `code`
    #[must_use]
    pub fn exists(&self, code: &str) -> bool {
        self.modpack_dir(code).is_ok_and(|dir| dir.is_dir())
    }
}

/// Create a staging file next to its final destination so that
/// `persist` is a same-filesystem rename
pub(crate) fn staging_file(dir: &Path) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(dir)
}

/// Replace `path` with `bytes` without readers ever seeing a partial file
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
    let mut staged = staging_file(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}
