//! modsync-core: modpack sync engine
//!
//! Content-addressed storage of modpack files (mods and configs) under short
//! shareable codes, with a per-modpack manifest, a downloadable archive and
//! owner-only locking.

pub mod archive;
pub mod codegen;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod info;
pub mod ingest;
pub mod layout;
pub mod lock;
pub mod manifest;
pub mod path;
pub mod scan;
pub mod snapshot;
pub mod users;

pub use archive::{ArchiveBuilder, ArchiveStats};
pub use codegen::{CodeAllocator, KeyShape};
pub use config::ModsyncConfig;
pub use engine::{ModpackAction, Summary, SyncEngine, UploadedFile};
pub use error::{ErrorResponse, Result, SyncError};
pub use hash::ContentHash;
pub use info::InfoFormat;
pub use ingest::{ContentIngestor, IngestOutcome};
pub use layout::ModpackLayout;
pub use lock::LockCoordinator;
pub use manifest::{FileRecord, ManifestStore, Modpack};
pub use path::{Category, UploadPath};
pub use scan::{FileEntry, Scanner};
pub use snapshot::{Snapshot, SnapshotDiff};
pub use users::{IdentityStore, UserStore};
