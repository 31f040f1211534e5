//! Collecting local game files into an upload batch

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use modsync_core::{UploadPath, UploadedFile};

/// Directories uploaded when none are named
pub const DEFAULT_PATHS: [&str; 2] = ["mods", "config"];

/// A local file opened on first read
///
/// Batches can hold hundreds of mods; opening lazily keeps at most one
/// descriptor open since the engine ingests files one at a time.
#[derive(Debug)]
pub struct LazyFile {
    path: PathBuf,
    file: Option<File>,
}

impl LazyFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    fn file(&mut self) -> std::io::Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("file handle missing after open"))
    }
}

impl Read for LazyFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file()?.read(buf)
    }
}

impl Seek for LazyFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file()?.seek(pos)
    }
}

/// Local files selected for upload
pub struct Batch {
    pub files: Vec<UploadedFile<LazyFile>>,
    pub total_bytes: u64,
}

/// Walk `paths` under `root` and build the batch.
///
/// Each regular file is named by its path relative to `root`, so the first
/// segment is the category. Missing paths are skipped with a warning.
pub fn collect(root: &Path, paths: &[PathBuf]) -> Result<Batch> {
    let mut found = Vec::new();

    for relative in paths {
        let start = root.join(relative);
        if !start.exists() {
            warn!(path = %start.display(), "skipping missing path");
            continue;
        }

        let walker = WalkBuilder::new(&start)
            .standard_filters(false)
            .follow_links(true)
            .build();
        for entry in walker {
            let entry = entry.wrap_err_with(|| format!("walking {}", start.display()))?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let upload = UploadPath::relative_to(root, entry.path())?;
            let size = entry.metadata()?.len();
            found.push((upload, entry.into_path(), size));
        }
    }

    found.sort_by(|a, b| a.0.logical().cmp(&b.0.logical()));
    found.dedup_by(|a, b| a.0 == b.0);

    let total_bytes = found.iter().map(|(_, _, size)| size).sum();
    let files = found
        .into_iter()
        .map(|(upload, full, _)| {
            debug!(path = %upload, "queued");
            UploadedFile::new(upload.logical(), LazyFile::new(full))
        })
        .collect();

    Ok(Batch { files, total_bytes })
}
