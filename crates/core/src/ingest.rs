//! Content ingestion: hash, dedup against the manifest, write what changed

use std::io::{self, Read, Seek, SeekFrom};

use tracing::debug;

use crate::error::SyncError;
use crate::hash::ContentHash;
use crate::layout::{ModpackLayout, staging_file};
use crate::manifest::{FileRecord, Modpack};
use crate::path::UploadPath;

/// What happened to one uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Same bytes already stored at this path; nothing was written
    Unchanged,
    /// New or changed bytes were written and the manifest entry updated
    Written {
        size: u64,
        hash: ContentHash,
        /// Whether an older version of the file was replaced
        replaced: bool,
    },
}

impl IngestOutcome {
    #[must_use]
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Writes uploaded files into a modpack tree
#[derive(Debug, Clone)]
pub struct ContentIngestor {
    layout: ModpackLayout,
    chunk_size: usize,
}

impl ContentIngestor {
    #[must_use]
    pub fn new(layout: ModpackLayout, chunk_size: usize) -> Self {
        Self { layout, chunk_size }
    }

    /// Ingest one file into `modpack`.
    ///
    /// The content is hashed first; if the manifest already holds the same
    /// hash at `path` nothing is touched. Otherwise the bytes are staged next
    /// to the target, checked against the first-pass hash and renamed into
    /// place, and only then is the in-memory manifest updated. The caller is
    /// responsible for saving the manifest.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the content changed between the two passes,
    /// or a storage error if reading or writing fails
    pub fn ingest<R: Read + Seek>(
        &self,
        modpack: &mut Modpack,
        path: &UploadPath,
        content: &mut R,
    ) -> Result<IngestOutcome, SyncError> {
        content.seek(SeekFrom::Start(0))?;
        let (hash, _) = ContentHash::from_reader(content, self.chunk_size)?;

        if modpack.get(path).is_some_and(|r| r.content_hash == hash) {
            debug!(code = %modpack.code, path = %path, %hash, "unchanged, skipping");
            return Ok(IngestOutcome::Unchanged);
        }

        let target = path.to_fs_path(&self.layout.modpack_dir(&modpack.code)?);
        let parent = target
            .parent()
            .ok_or_else(|| SyncError::InvalidInput(format!("bad target for {path}")))?;
        std::fs::create_dir_all(parent).map_err(|e| on_disk_clash(path, e))?;

        content.seek(SeekFrom::Start(0))?;
        let mut staged = staging_file(parent)?;
        let (written_hash, size) =
            ContentHash::copy_hashed(content, staged.as_file_mut(), self.chunk_size)?;
        if written_hash != hash {
            // Dropping `staged` removes the partial file.
            return Err(SyncError::InvalidInput(format!(
                "content of {path} changed while it was being stored"
            )));
        }
        staged.as_file().sync_all()?;
        staged
            .persist(&target)
            .map_err(|e| on_disk_clash(path, e.error))?;

        let previous = modpack.upsert(
            path,
            FileRecord {
                logical_path: path.logical(),
                size,
                content_hash: hash,
            },
        );
        debug!(
            code = %modpack.code,
            path = %path,
            %hash,
            size,
            replaced = previous.is_some(),
            "stored file"
        );

        Ok(IngestOutcome::Written {
            size,
            hash,
            replaced: previous.is_some(),
        })
    }
}

/// A file or directory already occupying part of the target path is a bad
/// upload, not a storage fault
fn on_disk_clash(path: &UploadPath, err: io::Error) -> SyncError {
    match err.kind() {
        io::ErrorKind::IsADirectory
        | io::ErrorKind::NotADirectory
        | io::ErrorKind::AlreadyExists => {
            SyncError::InvalidInput(format!("{path} clashes with an existing entry on disk"))
        }
        _ => err.into(),
    }
}
