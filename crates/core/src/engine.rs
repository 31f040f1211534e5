//! Request orchestration
//!
//! [`SyncEngine`] is the only entry point the request layer talks to. Each
//! call resolves the caller, checks ownership and then drives the manifest
//! store, ingestor, archive builder and lock coordinator under the per-code
//! guard.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use askama::Template;
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::ArchiveBuilder;
use crate::codegen::CodeAllocator;
use crate::config::ModsyncConfig;
use crate::error::SyncError;
use crate::info::{InfoFormat, InfoView};
use crate::ingest::{ContentIngestor, IngestOutcome};
use crate::layout::ModpackLayout;
use crate::lock::LockCoordinator;
use crate::manifest::{ManifestStore, Modpack};
use crate::path::{Category, UploadPath};
use crate::scan::Scanner;
use crate::snapshot::{Snapshot, SnapshotDiff};
use crate::users::{IdentityStore, UserStore};

/// Directory under the data dir holding modpacks and archives
pub const MODPACKS_DIR: &str = "modpacks";

/// User store file under the data dir
pub const USERS_FILE: &str = "users.json";

/// One file of an upload batch
#[derive(Debug)]
pub struct UploadedFile<R> {
    /// Client-declared path, category first (`mods/foo.jar`)
    pub path: String,
    pub content: R,
}

impl<R> UploadedFile<R> {
    pub fn new(path: impl Into<String>, content: R) -> Self {
        Self {
            path: path.into(),
            content,
        }
    }
}

/// Result of one upload batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Files that were new or had different bytes
    pub files_changed: u64,
    /// Bytes written for those files
    pub bytes_changed: u64,
    pub archive_rebuilt: bool,
}

impl Summary {
    /// Human-readable confirmation for the client
    #[must_use]
    pub fn message(&self, code: &str) -> String {
        format!(
            "{} files with size {} uploaded for code {code}.",
            self.files_changed,
            humansize::format_size(self.bytes_changed, humansize::BINARY)
        )
    }
}

/// Owner-only state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModpackAction {
    Lock,
    Unlock,
    /// Wipe every file, keeping code, owner and name
    Reset,
}

impl FromStr for ModpackAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock" => Ok(Self::Lock),
            "unlock" => Ok(Self::Unlock),
            "reset" => Ok(Self::Reset),
            other => Err(SyncError::InvalidInput(format!("unknown action {other:?}"))),
        }
    }
}

impl fmt::Display for ModpackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Reset => "reset",
        })
    }
}

/// The modpack sync engine
#[derive(Debug)]
pub struct SyncEngine<U: IdentityStore = UserStore> {
    layout: ModpackLayout,
    manifests: ManifestStore,
    ingestor: ContentIngestor,
    archives: ArchiveBuilder,
    locks: LockCoordinator,
    codes: CodeAllocator,
    identity: U,
}

impl SyncEngine<UserStore> {
    /// Open the engine over a data directory, reading `modsync.toml` if present.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the directories and user
    /// store cannot be created
    pub fn open(data_dir: &Path) -> Result<Self, SyncError> {
        let config = ModsyncConfig::load(data_dir)?;
        Self::open_with(data_dir, &config)
    }

    /// Open with an explicit config.
    ///
    /// # Errors
    /// Same as [`SyncEngine::open`]
    pub fn open_with(data_dir: &Path, config: &ModsyncConfig) -> Result<Self, SyncError> {
        let store_root = data_dir.join(MODPACKS_DIR);
        std::fs::create_dir_all(&store_root)?;
        let users = UserStore::open(data_dir.join(USERS_FILE), config.token)?;
        Self::with_identity(store_root, config, users)
    }

    /// The file-backed user store
    #[must_use]
    pub fn users(&self) -> &UserStore {
        &self.identity
    }
}

impl<U: IdentityStore> SyncEngine<U> {
    /// Build an engine over `store_root` with any identity backend.
    ///
    /// # Errors
    /// Returns `Config` if `config` has unusable values
    pub fn with_identity(
        store_root: impl Into<PathBuf>,
        config: &ModsyncConfig,
        identity: U,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let layout = ModpackLayout::new(store_root);
        Ok(Self {
            manifests: ManifestStore::new(layout.clone()),
            ingestor: ContentIngestor::new(layout.clone(), config.hash_buffer_size),
            archives: ArchiveBuilder::new(layout.clone(), config.archive.compression_level),
            locks: LockCoordinator::new(layout.clone()),
            codes: CodeAllocator::new(config.code),
            layout,
            identity,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &U {
        &self.identity
    }

    fn authenticate(&self, token: &str) -> Result<String, SyncError> {
        self.identity.resolve_token(token)?.ok_or_else(|| {
            warn!("rejected unknown token");
            SyncError::Unauthorized
        })
    }

    /// Resolve the caller and load the modpack, failing unless they own it
    fn authorize(&self, code: &str, token: &str) -> Result<Modpack, SyncError> {
        let user = self.authenticate(token)?;
        let modpack = self.manifests.load(code)?;
        if modpack.owner != user {
            warn!(code, user = %user, owner = %modpack.owner, "rejected non-owner");
            return Err(SyncError::Forbidden {
                user,
                code: code.to_string(),
            });
        }
        Ok(modpack)
    }

    /// Store a batch of files in the modpack `code`.
    ///
    /// Files whose bytes already match the manifest are skipped. The archive
    /// is rebuilt once, after the manifest is saved, and only if something
    /// changed. If a file fails mid-batch the files before it stay committed
    /// and the error is returned.
    ///
    /// # Errors
    /// `Unauthorized`, `NotFound`, `Forbidden`, `Locked`, `InvalidInput` for
    /// an empty batch or a malformed or clashing path, or a storage error
    pub fn handle_upload<R: Read + Seek>(
        &self,
        code: &str,
        token: &str,
        files: Vec<UploadedFile<R>>,
    ) -> Result<Summary, SyncError> {
        self.authorize(code, token)?;

        let _guard = self.locks.guard(code);
        let mut modpack = self.manifests.load(code)?;
        if modpack.locked {
            warn!(code, "upload rejected, modpack is locked");
            return Err(SyncError::Locked(code.to_string()));
        }

        if files.is_empty() {
            return Err(SyncError::InvalidInput("no files uploaded".to_string()));
        }
        // Every path is checked before anything touches the disk.
        let batch = files
            .into_iter()
            .map(|f| Ok((UploadPath::parse(&f.path)?, f.content)))
            .collect::<Result<Vec<_>, SyncError>>()?;
        check_nesting(&modpack, batch.iter().map(|(path, _)| path))?;

        let mut summary = Summary::default();
        let mut failure = None;
        for (path, mut content) in batch {
            match self.ingestor.ingest(&mut modpack, &path, &mut content) {
                Ok(IngestOutcome::Written { size, .. }) => {
                    summary.files_changed += 1;
                    summary.bytes_changed += size;
                }
                Ok(IngestOutcome::Unchanged) => {}
                Err(e) => {
                    warn!(
                        code,
                        path = %path,
                        error = %e,
                        "ingest failed, committing earlier files"
                    );
                    failure = Some(e);
                    break;
                }
            }
        }

        if summary.files_changed > 0 {
            self.manifests.save(&mut modpack)?;
            self.archives.rebuild(code)?;
            summary.archive_rebuilt = true;
        }

        if let Some(e) = failure {
            return Err(e);
        }

        info!(
            code,
            files = summary.files_changed,
            bytes = summary.bytes_changed,
            rebuilt = summary.archive_rebuilt,
            "upload complete"
        );
        Ok(summary)
    }

    /// Allocate a fresh code and create an empty modpack owned by the caller.
    ///
    /// # Errors
    /// `Unauthorized` for an unknown token, or a storage error
    pub fn create_modpack(&self, token: &str, name: Option<String>) -> Result<Modpack, SyncError> {
        let owner = self.authenticate(token)?;
        let code = self.codes.allocate(|candidate| self.manifests.claim(candidate))?;

        let created = self
            .manifests
            .create(&code, &owner, name)
            .and_then(|modpack| {
                self.archives.rebuild(&code)?;
                self.identity.record_ownership(&owner, &code)?;
                Ok(modpack)
            });

        match created {
            Ok(modpack) => {
                info!(code = %code, owner = %owner, "modpack ready");
                Ok(modpack)
            }
            Err(e) => {
                warn!(code = %code, error = %e, "modpack creation failed, releasing code");
                // Cleanup is best effort; report the creation error.
                let _ = self.archives.remove(&code);
                let _ = self.manifests.remove(&code);
                Err(e)
            }
        }
    }

    /// Lock, unlock or reset a modpack. Only the owner may do this.
    ///
    /// Returns the confirmation message for the client.
    ///
    /// # Errors
    /// `Unauthorized`, `NotFound`, `Forbidden`, or a storage error
    pub fn apply_action(
        &self,
        code: &str,
        token: &str,
        action: ModpackAction,
    ) -> Result<&'static str, SyncError> {
        let modpack = self.authorize(code, token)?;
        let _guard = self.locks.guard(code);

        match action {
            ModpackAction::Lock => {
                self.locks.lock(code)?;
                Ok("modpack locked")
            }
            ModpackAction::Unlock => {
                self.locks.unlock(code)?;
                Ok("modpack unlocked")
            }
            ModpackAction::Reset => {
                self.reset(modpack)?;
                Ok("modpack empty")
            }
        }
    }

    /// Wipe and recreate `modpack`. Caller holds the guard.
    fn reset(&self, modpack: Modpack) -> Result<(), SyncError> {
        let Modpack {
            code, owner, name, ..
        } = modpack;

        self.archives.remove(&code)?;
        self.manifests.remove(&code)?;
        self.manifests.create(&code, &owner, name)?;
        self.archives.rebuild(&code)?;

        info!(code = %code, owner = %owner, "modpack reset");
        Ok(())
    }

    /// Public read of a modpack manifest.
    ///
    /// # Errors
    /// `NotFound` if the code is unknown
    pub fn modpack(&self, code: &str) -> Result<Modpack, SyncError> {
        self.manifests.load(code)
    }

    /// Render the info page for `code`.
    ///
    /// # Errors
    /// `NotFound` if the code is unknown, or a rendering error
    pub fn render_info(&self, code: &str, format: InfoFormat) -> Result<String, SyncError> {
        let modpack = self.manifests.load(code)?;
        match format {
            InfoFormat::Json => Ok(serde_json::to_string_pretty(&modpack)?),
            InfoFormat::Html => {
                let archive = self.layout.archive_path(code)?;
                let archive_name = archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let modified = std::fs::metadata(&archive)
                    .and_then(|m| m.modified())
                    .ok();
                Ok(InfoView::new(&modpack, archive_name, modified).render()?)
            }
        }
    }

    /// Location of the downloadable archive.
    ///
    /// # Errors
    /// `NotFound` if the modpack or its archive does not exist
    pub fn archive_path(&self, code: &str) -> Result<PathBuf, SyncError> {
        let path = self.layout.archive_path(code)?;
        if self.layout.exists(code) && path.is_file() {
            Ok(path)
        } else {
            Err(SyncError::NotFound(code.to_string()))
        }
    }

    /// Open the downloadable archive for reading.
    ///
    /// # Errors
    /// `NotFound` if the modpack or its archive does not exist
    pub fn open_archive(&self, code: &str) -> Result<File, SyncError> {
        if !self.layout.exists(code) {
            return Err(SyncError::NotFound(code.to_string()));
        }
        self.archives.open(code)
    }

    /// Hash every stored file and compare it with the manifest.
    ///
    /// An empty diff means the manifest describes exactly what is on disk.
    ///
    /// # Errors
    /// `NotFound` if the code is unknown, or a storage error
    pub fn verify(&self, code: &str) -> Result<SnapshotDiff, SyncError> {
        let modpack = self.manifests.load(code)?;
        let on_disk = Snapshot::from_entries(Scanner::new(self.layout.modpack_dir(code)?).scan()?);
        let diff = Snapshot::from_manifest(&modpack).diff(&on_disk);
        if diff.is_empty() {
            info!(code, files = on_disk.len(), "manifest matches disk");
        } else {
            warn!(
                code,
                added = diff.added.len(),
                removed = diff.removed.len(),
                modified = diff.modified.len(),
                "manifest out of sync with disk"
            );
        }
        Ok(diff)
    }
}

/// Reject paths that would need one location to be both a file and a
/// directory, within the batch or against what is already stored
fn check_nesting<'a>(
    modpack: &Modpack,
    paths: impl Iterator<Item = &'a UploadPath>,
) -> Result<(), SyncError> {
    let paths: Vec<&UploadPath> = paths.collect();
    let files: HashSet<(Category, &str)> =
        paths.iter().map(|&p| (p.category(), p.key())).collect();

    for path in paths {
        if let Some(parent) = path
            .parent_keys()
            .find(|key| files.contains(&(path.category(), *key)))
        {
            return Err(SyncError::InvalidInput(format!(
                "{path} is below {}/{parent}, which is uploaded as a file",
                path.category()
            )));
        }
        if let Some(stored) = modpack.nesting_conflict(path) {
            return Err(SyncError::InvalidInput(format!(
                "{path} clashes with stored file {}",
                stored.logical_path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Token table fixed at construction
    #[derive(Debug, Default)]
    struct StaticIdentity {
        tokens: HashMap<String, String>,
        owned: Mutex<Vec<(String, String)>>,
    }

    impl StaticIdentity {
        fn with(users: &[(&str, &str)]) -> Self {
            Self {
                tokens: users
                    .iter()
                    .map(|(token, nick)| ((*token).to_string(), (*nick).to_string()))
                    .collect(),
                owned: Mutex::default(),
            }
        }
    }

    impl IdentityStore for StaticIdentity {
        fn resolve_token(&self, token: &str) -> Result<Option<String>, SyncError> {
            Ok(self.tokens.get(token).cloned())
        }

        fn record_ownership(&self, nickname: &str, code: &str) -> Result<(), SyncError> {
            self.owned
                .lock()
                .push((nickname.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn engine() -> (TempDir, SyncEngine<StaticIdentity>) {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::with_identity(
            dir.path(),
            &ModsyncConfig::default(),
            StaticIdentity::with(&[("tok-alice", "alice"), ("tok-bob", "bob")]),
        )
        .unwrap();
        (dir, engine)
    }

    fn file(path: &str, data: &[u8]) -> UploadedFile<Cursor<Vec<u8>>> {
        UploadedFile::new(path, Cursor::new(data.to_vec()))
    }

    #[test]
    fn test_create_records_owner_and_builds_archive() {
        let (dir, engine) = engine();
        let modpack = engine
            .create_modpack("tok-alice", Some("Survival".to_string()))
            .unwrap();

        assert_eq!(modpack.owner, "alice");
        assert!(engine.codes.shape().matches(&modpack.code));
        assert!(dir.path().join(format!("{}.tar.gz", modpack.code)).is_file());
        assert_eq!(
            engine.identity().owned.lock().as_slice(),
            &[("alice".to_string(), modpack.code.clone())]
        );
    }

    #[test]
    fn test_create_requires_known_token() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.create_modpack("nope", None),
            Err(SyncError::Unauthorized)
        ));
    }

    #[test]
    fn test_upload_checks_in_order() {
        let (_dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;

        assert!(matches!(
            engine.handle_upload(&code, "nope", vec![file("mods/a.jar", b"a")]),
            Err(SyncError::Unauthorized)
        ));
        assert!(matches!(
            engine.handle_upload("zzzz-zzzz", "tok-alice", vec![file("mods/a.jar", b"a")]),
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(
            engine.handle_upload(&code, "tok-bob", vec![file("mods/a.jar", b"a")]),
            Err(SyncError::Forbidden { .. })
        ));
        assert!(matches!(
            engine.handle_upload::<Cursor<Vec<u8>>>(&code, "tok-alice", vec![]),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unchanged_batch_skips_rebuild() {
        let (_dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;

        let first = engine
            .handle_upload(&code, "tok-alice", vec![file("mods/a.jar", b"aaaa")])
            .unwrap();
        assert_eq!(
            first,
            Summary {
                files_changed: 1,
                bytes_changed: 4,
                archive_rebuilt: true,
            }
        );

        let second = engine
            .handle_upload(&code, "tok-alice", vec![file("mods/a.jar", b"aaaa")])
            .unwrap();
        assert_eq!(second, Summary::default());
    }

    #[test]
    fn test_bad_path_rejects_whole_batch() {
        let (dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;

        let err = engine
            .handle_upload(
                &code,
                "tok-alice",
                vec![file("mods/ok.jar", b"ok"), file("mods/../../escape", b"x")],
            )
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(engine.modpack(&code).unwrap().is_empty());
        assert!(!dir.path().join(&code).join("mods/ok.jar").exists());
    }

    #[test]
    fn test_locked_reported_before_batch_problems() {
        let (_dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;
        engine
            .apply_action(&code, "tok-alice", ModpackAction::Lock)
            .unwrap();

        assert!(matches!(
            engine.handle_upload::<Cursor<Vec<u8>>>(&code, "tok-alice", vec![]),
            Err(SyncError::Locked(_))
        ));
        assert!(matches!(
            engine.handle_upload(&code, "tok-alice", vec![file("resourcepacks/x.zip", b"x")]),
            Err(SyncError::Locked(_))
        ));
    }

    #[test]
    fn test_nested_paths_in_one_batch_rejected() {
        let (dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;

        let err = engine
            .handle_upload(
                &code,
                "tok-alice",
                vec![
                    file("mods/ok.jar", b"ok"),
                    file("mods/x/y.jar", b"y"),
                    file("mods/x", b"x"),
                ],
            )
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidInput(_)), "{err:?}");
        assert!(engine.modpack(&code).unwrap().is_empty());
        assert!(!dir.path().join(&code).join("mods/ok.jar").exists());
    }

    #[test]
    fn test_path_clashing_with_stored_file_rejected() {
        let (dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;
        engine
            .handle_upload(&code, "tok-alice", vec![file("config/a/b.cfg", b"b")])
            .unwrap();

        for clash in ["config/a", "config/a/b.cfg/c.cfg"] {
            let err = engine
                .handle_upload(
                    &code,
                    "tok-alice",
                    vec![file("mods/ok.jar", b"ok"), file(clash, b"x")],
                )
                .unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)), "{clash}: {err:?}");
        }

        let modpack = engine.modpack(&code).unwrap();
        assert_eq!(modpack.file_count(), 1);
        assert!(!dir.path().join(&code).join("mods/ok.jar").exists());
        assert!(dir.path().join(&code).join("config/a/b.cfg").is_file());
    }

    /// Reader that fails partway through
    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("connection reset"))
        }
    }

    impl Seek for Broken {
        fn seek(&mut self, _pos: std::io::SeekFrom) -> std::io::Result<u64> {
            Ok(0)
        }
    }

    enum Either {
        Good(Cursor<Vec<u8>>),
        Bad(Broken),
    }

    impl Read for Either {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self {
                Self::Good(c) => c.read(buf),
                Self::Bad(b) => b.read(buf),
            }
        }
    }

    impl Seek for Either {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            match self {
                Self::Good(c) => c.seek(pos),
                Self::Bad(b) => b.seek(pos),
            }
        }
    }

    #[test]
    fn test_failure_mid_batch_commits_earlier_files() {
        let (_dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;

        let err = engine
            .handle_upload(
                &code,
                "tok-alice",
                vec![
                    UploadedFile::new(
                        "mods/first.jar",
                        Either::Good(Cursor::new(b"first".to_vec())),
                    ),
                    UploadedFile::new("mods/second.jar", Either::Bad(Broken)),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));

        let modpack = engine.modpack(&code).unwrap();
        assert_eq!(modpack.file_count(), 1);
        assert_eq!(modpack.total_size(), 5);
        assert!(engine.verify(&code).unwrap().is_empty());
        let entries = engine.archives.entries(&code).unwrap();
        assert!(entries.contains(&"mods/first.jar".to_string()));
    }

    #[test]
    fn test_actions_are_owner_only() {
        let (_dir, engine) = engine();
        let code = engine.create_modpack("tok-alice", None).unwrap().code;

        for action in [ModpackAction::Lock, ModpackAction::Unlock, ModpackAction::Reset] {
            assert!(matches!(
                engine.apply_action(&code, "tok-bob", action),
                Err(SyncError::Forbidden { .. })
            ));
        }
        assert_eq!(
            engine.apply_action(&code, "tok-alice", ModpackAction::Lock).unwrap(),
            "modpack locked"
        );
        assert!(engine.modpack(&code).unwrap().locked);
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("reset".parse::<ModpackAction>().unwrap(), ModpackAction::Reset);
        assert!(matches!(
            "delete".parse::<ModpackAction>(),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_summary_message() {
        let summary = Summary {
            files_changed: 1,
            bytes_changed: 100,
            archive_rebuilt: true,
        };
        assert_eq!(
            summary.message("aB3x-Q9rT"),
            "1 files with size 100 B uploaded for code aB3x-Q9rT."
        );
    }

    #[test]
    fn test_archive_lookup_unknown_code() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.archive_path("zzzz-zzzz"),
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(
            engine.open_archive("../etc"),
            Err(SyncError::NotFound(_))
        ));
    }
}
