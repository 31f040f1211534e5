//! Persistent per-modpack manifest
//!
//! The manifest is the single source of truth for what a modpack contains.
//! Totals are derived from the entries and recomputed on load and save, so a
//! stale `totalSize` or `fileCount` never survives a round trip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::hash::ContentHash;
use crate::layout::{ModpackLayout, write_atomic};
use crate::path::{Category, UploadPath};

/// Metadata for one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the modpack root, `/`-separated, category first
    pub logical_path: String,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the bytes on disk
    pub content_hash: ContentHash,
}

/// A modpack and its manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modpack {
    pub code: String,
    pub owner: String,
    pub name: Option<String>,
    total_size: u64,
    file_count: u64,
    entries: BTreeMap<Category, BTreeMap<String, FileRecord>>,
    /// Mirrors the lock marker; never read back from the manifest file
    #[serde(default, skip_deserializing)]
    pub locked: bool,
}

impl Modpack {
    /// An empty modpack with both categories present
    #[must_use]
    pub fn new(code: impl Into<String>, owner: impl Into<String>, name: Option<String>) -> Self {
        Self {
            code: code.into(),
            owner: owner.into(),
            name,
            total_size: 0,
            file_count: 0,
            entries: Category::ALL
                .into_iter()
                .map(|c| (c, BTreeMap::new()))
                .collect(),
            locked: false,
        }
    }

    /// Sum of bytes of all stored files
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of stored files
    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Entries of one category, keyed by path below the category
    #[must_use]
    pub fn category(&self, category: Category) -> Option<&BTreeMap<String, FileRecord>> {
        self.entries.get(&category)
    }

    /// Look up the record for an upload path
    #[must_use]
    pub fn get(&self, path: &UploadPath) -> Option<&FileRecord> {
        self.entries.get(&path.category())?.get(path.key())
    }

    /// A stored entry that cannot coexist with a file at `path`: either one
    /// of its parent directories is stored as a file, or files are stored
    /// below it.
    #[must_use]
    pub fn nesting_conflict(&self, path: &UploadPath) -> Option<&FileRecord> {
        let entries = self.entries.get(&path.category())?;
        if let Some(record) = path.parent_keys().find_map(|parent| entries.get(parent)) {
            return Some(record);
        }
        let below = format!("{}/", path.key());
        entries
            .range(below.clone()..)
            .next()
            .filter(|(key, _)| key.starts_with(&below))
            .map(|(_, record)| record)
    }

    /// Iterate over every record in category then key order
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.entries.values().flat_map(BTreeMap::values)
    }

    /// Whether the modpack stores no files
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_count == 0
    }

    /// Insert or replace the record at `path`, adjusting the totals.
    ///
    /// Returns the record that was replaced, if any.
    pub fn upsert(&mut self, path: &UploadPath, record: FileRecord) -> Option<FileRecord> {
        let new_size = record.size;
        let previous = self
            .entries
            .entry(path.category())
            .or_default()
            .insert(path.key().to_string(), record);

        match &previous {
            Some(old) => {
                self.total_size = self.total_size + new_size - old.size;
            }
            None => {
                self.file_count += 1;
                self.total_size += new_size;
            }
        }
        previous
    }

    /// Recompute `total_size` and `file_count` from the entries
    pub fn recompute_totals(&mut self) {
        for category in Category::ALL {
            self.entries.entry(category).or_default();
        }
        self.file_count = self.records().count() as u64;
        self.total_size = self.records().map(|r| r.size).sum();
    }
}

/// Loads and saves manifests under a [`ModpackLayout`]
#[derive(Debug, Clone)]
pub struct ManifestStore {
    layout: ModpackLayout,
}

impl ManifestStore {
    #[must_use]
    pub fn new(layout: ModpackLayout) -> Self {
        Self { layout }
    }

    /// Atomically take `code` by creating its directory.
    ///
    /// # Errors
    /// Returns `Conflict` if the directory already exists
    pub fn claim(&self, code: &str) -> Result<(), SyncError> {
        let dir = self.layout.modpack_dir(code)?;
        match std::fs::create_dir(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SyncError::Conflict(code.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write an empty manifest and category directories for `code`.
    ///
    /// # Errors
    /// Returns an error if the directories or manifest cannot be written
    pub fn create(
        &self,
        code: &str,
        owner: &str,
        name: Option<String>,
    ) -> Result<Modpack, SyncError> {
        let dir = self.layout.modpack_dir(code)?;
        for category in Category::ALL {
            std::fs::create_dir_all(dir.join(category.as_str()))?;
        }

        let mut modpack = Modpack::new(code, owner, name);
        self.save(&mut modpack)?;
        info!(code, owner, "created modpack");
        Ok(modpack)
    }

    /// Load the manifest for `code`.
    ///
    /// # Errors
    /// Returns `NotFound` if the modpack does not exist, or a storage error if
    /// the manifest cannot be read or parsed
    pub fn load(&self, code: &str) -> Result<Modpack, SyncError> {
        let manifest_path = self.layout.manifest_path(code)?;
        let bytes = match std::fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(code.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut modpack: Modpack = serde_json::from_slice(&bytes)?;
        modpack.recompute_totals();
        modpack.locked = self.layout.is_locked(code)?;
        Ok(modpack)
    }

    /// Persist `modpack`, replacing the manifest atomically.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn save(&self, modpack: &mut Modpack) -> Result<(), SyncError> {
        modpack.recompute_totals();
        let manifest_path = self.layout.manifest_path(&modpack.code)?;
        let json = serde_json::to_vec_pretty(modpack)?;
        write_atomic(&manifest_path, &json)?;
        debug!(
            code = %modpack.code,
            files = modpack.file_count,
            bytes = modpack.total_size,
            "saved manifest"
        );
        Ok(())
    }

    /// Delete the modpack directory and everything in it.
    ///
    /// # Errors
    /// Returns an error if removal fails for a reason other than absence
    pub fn remove(&self, code: &str) -> Result<(), SyncError> {
        let dir = self.layout.modpack_dir(code)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
