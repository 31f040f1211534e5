//! Modpack locking
//!
//! Two layers:
//! - the user-visible lock: a `lock` marker file that makes uploads fail
//!   with `Locked` until the owner unlocks the modpack,
//! - a per-code in-process mutex that every mutation holds, so concurrent
//!   requests against one modpack run one after another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use tracing::info;

use crate::error::SyncError;
use crate::layout::ModpackLayout;

/// Exclusive access to one modpack, released on drop
pub type MutationGuard = ArcMutexGuard<RawMutex, ()>;

/// Lock marker management plus the per-code mutation mutexes
#[derive(Debug)]
pub struct LockCoordinator {
    layout: ModpackLayout,
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockCoordinator {
    #[must_use]
    pub fn new(layout: ModpackLayout) -> Self {
        Self {
            layout,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Block until this thread is the only mutator of `code`
    pub fn guard(&self, code: &str) -> MutationGuard {
        let slot = Arc::clone(
            self.table
                .lock()
                .entry(code.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        slot.lock_arc()
    }

    /// Set the lock marker. Locking a locked modpack is a no-op.
    ///
    /// # Errors
    /// Returns an error if the marker cannot be written
    pub fn lock(&self, code: &str) -> Result<(), SyncError> {
        if !self.layout.is_locked(code)? {
            std::fs::File::create(self.layout.lock_path(code)?)?;
            info!(code, "modpack locked");
        }
        Ok(())
    }

    /// Clear the lock marker. Unlocking an unlocked modpack is a no-op.
    ///
    /// # Errors
    /// Returns an error if the marker exists but cannot be removed
    pub fn unlock(&self, code: &str) -> Result<(), SyncError> {
        match std::fs::remove_file(self.layout.lock_path(code)?) {
            Ok(()) => {
                info!(code, "modpack unlocked");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
