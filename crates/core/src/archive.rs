//! Packaging a modpack tree as one downloadable `.tar.gz`
//!
//! The archive is always rebuilt wholesale into a staging file and renamed
//! over the previous one, so a failed build leaves the old archive intact.

use std::fs::File;
use std::io::BufReader;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::layout::{ModpackLayout, staging_file};
use crate::scan::Scanner;

/// Result of one archive rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Files packed, manifest included
    pub files: usize,
    /// Compressed size of the archive
    pub archive_bytes: u64,
}

/// Builds and reads modpack archives
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    layout: ModpackLayout,
    compression: Compression,
}

impl ArchiveBuilder {
    #[must_use]
    pub fn new(layout: ModpackLayout, compression_level: u32) -> Self {
        Self {
            layout,
            compression: Compression::new(compression_level),
        }
    }

    /// Repackage the modpack directory of `code`.
    ///
    /// # Errors
    /// Returns an error if the tree cannot be read or the archive written; the
    /// previous archive is left untouched in that case
    pub fn rebuild(&self, code: &str) -> Result<ArchiveStats, SyncError> {
        let modpack_dir = self.layout.modpack_dir(code)?;
        let archive_path = self.layout.archive_path(code)?;
        let files = Scanner::new(&modpack_dir).scan_paths()?;

        let staged = staging_file(self.layout.root())?;
        let encoder = GzEncoder::new(staged, self.compression);
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);

        for (full, name) in &files {
            let mut file = File::open(full)?;
            builder.append_file(name, &mut file)?;
        }

        let encoder = builder.into_inner()?;
        let staged = encoder.finish()?;
        staged.as_file().sync_all()?;
        let archive_bytes = staged.as_file().metadata()?.len();
        staged.persist(&archive_path).map_err(|e| e.error)?;

        info!(code, files = files.len(), archive_bytes, "rebuilt archive");
        Ok(ArchiveStats {
            files: files.len(),
            archive_bytes,
        })
    }

    /// Names of the files inside the current archive of `code`, in archive order.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no archive, or an error if it cannot be
    /// read
    pub fn entries(&self, code: &str) -> Result<Vec<String>, SyncError> {
        let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(self.open(code)?)));
        let mut names = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            names.push(entry.path()?.to_string_lossy().into_owned());
        }
        debug!(code, count = names.len(), "listed archive");
        Ok(names)
    }

    /// Open the current archive of `code` for reading.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no archive
    pub fn open(&self, code: &str) -> Result<File, SyncError> {
        let path = self.layout.archive_path(code)?;
        File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::NotFound(code.to_string()),
            _ => e.into(),
        })
    }

    /// Delete the archive of `code` if present.
    ///
    /// # Errors
    /// Returns an error if removal fails for a reason other than absence
    pub fn remove(&self, code: &str) -> Result<(), SyncError> {
        match std::fs::remove_file(self.layout.archive_path(code)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
