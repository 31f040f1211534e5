//! Walking a modpack directory via the `ignore` crate

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::hash::ContentHash;
use crate::layout::LOCK_FILE;
use crate::path::STAGING_PREFIX;

/// Metadata for a single file on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path from the modpack root, `/`-separated
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Content hash (SHA-256)
    pub hash: ContentHash,
}

/// Scanner for one modpack tree
///
/// Every regular file is reported, hidden or not; ignore files have no
/// meaning inside a modpack. The lock marker and in-flight staging files are
/// skipped.
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    /// Create a new scanner for the given modpack directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false) // No .gitignore, .ignore or hidden-file rules
            .follow_links(false)
            .filter_entry(|e| {
                !e.file_name()
                    .to_string_lossy()
                    .starts_with(STAGING_PREFIX)
            });
        builder
    }

    /// Relative, `/`-separated name of `path`, or `None` if it is skipped
    fn relative_name(&self, path: &Path) -> Result<Option<String>, SyncError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
        if relative == Path::new(LOCK_FILE) {
            return Ok(None);
        }
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Some(name))
    }

    /// Scan and return only relative paths, sorted (no hashing)
    ///
    /// # Errors
    /// Returns an error if directory traversal fails
    pub fn scan_paths(&self) -> Result<Vec<(PathBuf, String)>, SyncError> {
        let mut paths = Vec::new();

        for result in self.walk_builder().build() {
            let entry = result.map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Some(name) = self.relative_name(entry.path())? {
                paths.push((entry.path().to_path_buf(), name));
            }
        }

        paths.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(paths)
    }

    /// Scan the directory and hash every file
    ///
    /// # Errors
    /// Returns an error if directory traversal or file reading fails
    pub fn scan(&self) -> Result<Vec<FileEntry>, SyncError> {
        self.scan_paths()?
            .into_iter()
            .map(|(full, path)| -> Result<FileEntry, SyncError> {
                let metadata = std::fs::metadata(&full)?;
                Ok(FileEntry {
                    path,
                    size: metadata.len(),
                    hash: ContentHash::from_file(&full)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_scan_modpack_tree() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("mods")).unwrap();
        fs::create_dir_all(dir.path().join("config/sodium")).unwrap();
        fs::write(dir.path().join("info.json"), "{}").unwrap();
        fs::write(dir.path().join("mods/a.jar"), "a").unwrap();
        fs::write(dir.path().join("config/sodium/opts.json"), "opts").unwrap();

        let entries = Scanner::new(dir.path()).scan().unwrap();

        assert_eq!(
            names(&entries),
            vec!["config/sodium/opts.json", "info.json", "mods/a.jar"]
        );
        let opts = &entries[0];
        assert_eq!(opts.size, 4);
        assert_eq!(opts.hash, ContentHash::from_bytes(b"opts"));
    }

    #[test]
    fn test_skips_lock_and_staging_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("mods")).unwrap();
        fs::write(dir.path().join(LOCK_FILE), "").unwrap();
        fs::write(dir.path().join("mods/.modsync-abc123"), "partial").unwrap();
        fs::write(dir.path().join("mods/real.jar"), "real").unwrap();

        let entries = Scanner::new(dir.path()).scan().unwrap();
        assert_eq!(names(&entries), vec!["mods/real.jar"]);
    }

    #[test]
    fn test_hidden_and_ignored_files_included() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join(".gitignore"), "*.cfg\n").unwrap();
        fs::write(dir.path().join("config/.hidden"), "h").unwrap();
        fs::write(dir.path().join("config/x.cfg"), "x").unwrap();

        let entries = Scanner::new(dir.path()).scan().unwrap();
        assert_eq!(
            names(&entries),
            vec![".gitignore", "config/.hidden", "config/x.cfg"]
        );
    }

    #[test]
    fn test_lock_marker_only_skipped_at_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config/lock"), "not a marker").unwrap();

        let paths = Scanner::new(dir.path()).scan_paths().unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].1, "config/lock");
    }
}
