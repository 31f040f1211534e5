//! Snapshot: a point-in-time view of a modpack's files
//!
//! Snapshots are taken from two sources, the manifest and the directory tree,
//! and diffed to check that every manifest hash matches the bytes on disk.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::hash::ContentHash;
use crate::manifest::Modpack;
use crate::path::UploadPath;
use crate::scan::FileEntry;

/// Size and hash of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileState {
    pub size: u64,
    pub hash: ContentHash,
}

/// A snapshot of a modpack's stored files, keyed by logical path
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub files: BTreeMap<String, FileState>,
}

impl Snapshot {
    /// Snapshot of what the manifest claims is stored
    #[must_use]
    pub fn from_manifest(modpack: &Modpack) -> Self {
        let files = modpack
            .records()
            .map(|r| {
                (
                    r.logical_path.clone(),
                    FileState {
                        size: r.size,
                        hash: r.content_hash,
                    },
                )
            })
            .collect();
        Self { files }
    }

    /// Snapshot of scanned files that live under a category directory
    ///
    /// Anything else in the tree (the manifest itself, stray files at the
    /// root) is not part of the stored file set.
    #[must_use]
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        let files = entries
            .into_iter()
            .filter(|e| UploadPath::parse(&e.path).is_ok())
            .map(|e| {
                (
                    e.path,
                    FileState {
                        size: e.size,
                        hash: e.hash,
                    },
                )
            })
            .collect();
        Self { files }
    }

    /// Get the number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Compare two snapshots and return the differences
    #[must_use]
    pub fn diff(&self, other: &Self) -> SnapshotDiff {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut modified = Vec::new();

        for (path, new_state) in &other.files {
            match self.files.get(path) {
                None => added.push(path.clone()),
                Some(old_state) if old_state != new_state => modified.push(path.clone()),
                _ => {}
            }
        }

        for path in self.files.keys() {
            if !other.files.contains_key(path) {
                removed.push(path.clone());
            }
        }

        SnapshotDiff {
            added,
            removed,
            modified,
        }
    }
}

/// Differences between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    /// Files that exist in new but not in old
    pub added: Vec<String>,
    /// Files that exist in old but not in new
    pub removed: Vec<String>,
    /// Files that exist in both but differ in size or content
    pub modified: Vec<String>,
}

impl SnapshotDiff {
    /// Check if there are any changes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Get total number of changes
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}
