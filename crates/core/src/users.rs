//! Identity store: nicknames, passwords and tokens
//!
//! The engine only needs [`IdentityStore`]. [`UserStore`] is the file-backed
//! implementation: an in-memory map behind a mutex, written to `users.json`
//! with write-temp-then-rename after every change. A change reaches the map
//! only once the file holding it has been written. Password hashing runs
//! outside the mutex.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::codegen::{CodeAllocator, KeyShape};
use crate::error::SyncError;
use crate::layout::write_atomic;

/// What the engine needs from the identity layer
pub trait IdentityStore: Send + Sync {
    /// Map a token to the nickname that owns it
    ///
    /// # Errors
    /// Returns a storage error if the lookup itself fails
    fn resolve_token(&self, token: &str) -> Result<Option<String>, SyncError>;

    /// Remember that `nickname` created modpack `code`
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted
    fn record_ownership(&self, nickname: &str, code: &str) -> Result<(), SyncError>;
}

/// One stored user
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    /// Argon2 PHC string, or a bare SHA-256 hex digest from older stores
    #[serde(rename = "pswd")]
    password_hash: String,
    token: String,
    /// Codes created by this user, oldest first
    #[serde(rename = "modpacks", default)]
    owned_codes: Vec<String>,
}

/// On-disk shape of `users.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UsersFile {
    users: BTreeMap<String, UserRecord>,
    /// Reverse index token -> nickname
    link: BTreeMap<String, String>,
}

/// File-backed user store
#[derive(Debug)]
pub struct UserStore {
    path: PathBuf,
    tokens: CodeAllocator,
    state: Mutex<UsersFile>,
}

impl UserStore {
    /// Open the store at `path`, creating an empty one if it is missing.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// cannot be created
    pub fn open(path: impl Into<PathBuf>, token_shape: KeyShape) -> Result<Self, SyncError> {
        let path = path.into();
        let state = if path.exists() {
            let mut state: UsersFile = serde_json::from_slice(&std::fs::read(&path)?)?;
            // The reverse index is derived; rebuild it so it can't drift.
            state.link = state
                .users
                .iter()
                .map(|(nick, user)| (user.token.clone(), nick.clone()))
                .collect();
            state
        } else {
            let state = UsersFile::default();
            write_atomic(&path, &serde_json::to_vec_pretty(&state)?)?;
            state
        };

        Ok(Self {
            path,
            tokens: CodeAllocator::new(token_shape),
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a user and return its token.
    ///
    /// # Errors
    /// Returns `InvalidInput` for empty credentials or a taken nickname
    pub fn register(&self, nickname: &str, password: &str) -> Result<String, SyncError> {
        check_credentials(nickname, password)?;
        let password_hash = hash_password(password)?;

        let mut state = self.state.lock();
        if state.users.contains_key(nickname) {
            return Err(SyncError::InvalidInput(format!(
                "user {nickname} already exists"
            )));
        }

        let token = self.tokens.allocate(|candidate| {
            if state.link.contains_key(candidate) {
                Err(SyncError::Conflict(candidate.to_string()))
            } else {
                Ok(())
            }
        })?;

        let mut next = UsersFile::clone(&state);
        next.users.insert(
            nickname.to_string(),
            UserRecord {
                password_hash,
                token: token.clone(),
                owned_codes: Vec::new(),
            },
        );
        next.link.insert(token.clone(), nickname.to_string());
        self.commit(&mut state, next)?;

        info!(nickname, "registered user");
        Ok(token)
    }

    /// Check credentials and return the user's token.
    ///
    /// A matching legacy SHA-256 hash is upgraded to Argon2 on the spot.
    ///
    /// # Errors
    /// Returns `Unauthorized` for an unknown user or a wrong password
    pub fn check(&self, nickname: &str, password: &str) -> Result<String, SyncError> {
        check_credentials(nickname, password)?;

        let (stored, token) = {
            let state = self.state.lock();
            let user = state.users.get(nickname).ok_or(SyncError::Unauthorized)?;
            (user.password_hash.clone(), user.token.clone())
        };

        match verify_password(&stored, password) {
            Verification::Match => Ok(token),
            Verification::LegacyMatch => {
                let upgraded = hash_password(password)?;
                let mut state = self.state.lock();
                // Skip if a concurrent check already replaced the hash.
                if state
                    .users
                    .get(nickname)
                    .is_some_and(|u| u.password_hash == stored)
                {
                    let mut next = UsersFile::clone(&state);
                    if let Some(user) = next.users.get_mut(nickname) {
                        user.password_hash = upgraded;
                    }
                    self.commit(&mut state, next)?;
                    info!(nickname, "upgraded legacy password hash");
                }
                Ok(token)
            }
            Verification::Mismatch => {
                warn!(nickname, "failed login");
                Err(SyncError::Unauthorized)
            }
        }
    }

    /// Codes created by `nickname`, oldest first.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the user does not exist
    pub fn owned_codes(&self, nickname: &str) -> Result<Vec<String>, SyncError> {
        self.state
            .lock()
            .users
            .get(nickname)
            .map(|u| u.owned_codes.clone())
            .ok_or_else(|| SyncError::InvalidInput(format!("unknown user {nickname}")))
    }

    /// Write `next` to disk, then make it the live state
    fn commit(
        &self,
        state: &mut MutexGuard<'_, UsersFile>,
        next: UsersFile,
    ) -> Result<(), SyncError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(&next)?)?;
        **state = next;
        Ok(())
    }
}

impl IdentityStore for UserStore {
    fn resolve_token(&self, token: &str) -> Result<Option<String>, SyncError> {
        Ok(self.state.lock().link.get(token).cloned())
    }

    fn record_ownership(&self, nickname: &str, code: &str) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        let user = state
            .users
            .get(nickname)
            .ok_or_else(|| SyncError::InvalidInput(format!("unknown user {nickname}")))?;
        if user.owned_codes.iter().any(|c| c == code) {
            return Ok(());
        }

        let mut next = UsersFile::clone(&state);
        if let Some(user) = next.users.get_mut(nickname) {
            user.owned_codes.push(code.to_string());
        }
        self.commit(&mut state, next)
    }
}

fn check_credentials(nickname: &str, password: &str) -> Result<(), SyncError> {
    if nickname.is_empty() || password.is_empty() {
        return Err(SyncError::InvalidInput(
            "nickname and password are required".to_string(),
        ));
    }
    Ok(())
}

enum Verification {
    Match,
    LegacyMatch,
    Mismatch,
}

fn hash_password(password: &str) -> Result<String, SyncError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| SyncError::Password(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SyncError::Password(e.to_string()))
}

fn verify_password(stored: &str, password: &str) -> Verification {
    if let Ok(parsed) = PasswordHash::new(stored) {
        return if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
        {
            Verification::Match
        } else {
            Verification::Mismatch
        };
    }

    // Older stores kept an unsalted SHA-256 hex digest
    if hex::encode(Sha256::digest(password.as_bytes())) == stored {
        Verification::LegacyMatch
    } else {
        Verification::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> UserStore {
        UserStore::open(dir.path().join("users.json"), KeyShape::TOKEN).unwrap()
    }

    #[test]
    fn test_register_then_check() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let token = store.register("alice", "pw1").unwrap();
        assert!(KeyShape::TOKEN.matches(&token));
        assert_eq!(store.check("alice", "pw1").unwrap(), token);
        assert_eq!(
            store.resolve_token(&token).unwrap().as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_wrong_password_and_unknown_user() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.register("alice", "pw1").unwrap();

        assert!(matches!(
            store.check("alice", "nope"),
            Err(SyncError::Unauthorized)
        ));
        assert!(matches!(
            store.check("bob", "pw1"),
            Err(SyncError::Unauthorized)
        ));
    }

    #[test]
    fn test_duplicate_and_empty_registration() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.register("alice", "pw1").unwrap();

        assert!(matches!(
            store.register("alice", "other"),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            store.register("", "pw"),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            store.register("carol", ""),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_passwords_are_salted() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.register("alice", "same").unwrap();
        store.register("bob", "same").unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let file: UsersFile = serde_json::from_str(&raw).unwrap();
        let a = &file.users["alice"].password_hash;
        let b = &file.users["bob"].password_hash;
        assert!(a.starts_with("$argon2"));
        assert_ne!(a, b);
        assert!(!raw.contains("\"same\""));
    }

    #[test]
    fn test_tokens_unique_and_persisted() {
        let dir = TempDir::new().unwrap();
        let (t1, t2) = {
            let store = open(&dir);
            (
                store.register("alice", "pw1").unwrap(),
                store.register("bob", "pw2").unwrap(),
            )
        };
        assert_ne!(t1, t2);

        let reopened = open(&dir);
        assert_eq!(reopened.resolve_token(&t1).unwrap().as_deref(), Some("alice"));
        assert_eq!(reopened.resolve_token(&t2).unwrap().as_deref(), Some("bob"));
        assert_eq!(reopened.resolve_token("bogus").unwrap(), None);
    }

    #[test]
    fn test_record_ownership_in_order() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.register("alice", "pw1").unwrap();

        store.record_ownership("alice", "aaaa-1111").unwrap();
        store.record_ownership("alice", "bbbb-2222").unwrap();
        store.record_ownership("alice", "aaaa-1111").unwrap();

        assert_eq!(
            open(&dir).owned_codes("alice").unwrap(),
            vec!["aaaa-1111".to_string(), "bbbb-2222".to_string()]
        );
        assert!(store.record_ownership("nobody", "cccc-3333").is_err());
    }

    #[test]
    fn test_failed_write_leaves_no_phantom_user() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let store = UserStore::open(sub.join("users.json"), KeyShape::TOKEN).unwrap();
        let alice = store.register("alice", "pw1").unwrap();

        std::fs::remove_dir_all(&sub).unwrap();
        assert!(store.register("bob", "pw2").is_err());
        assert!(store.record_ownership("alice", "aaaa-1111").is_err());
        assert!(matches!(
            store.check("bob", "pw2"),
            Err(SyncError::Unauthorized)
        ));
        assert!(store.owned_codes("alice").unwrap().is_empty());

        std::fs::create_dir(&sub).unwrap();
        let bob = store.register("bob", "pw2").unwrap();
        assert_eq!(store.check("bob", "pw2").unwrap(), bob);

        let reopened = UserStore::open(sub.join("users.json"), KeyShape::TOKEN).unwrap();
        assert_eq!(reopened.resolve_token(&alice).unwrap().as_deref(), Some("alice"));
        assert_eq!(reopened.resolve_token(&bob).unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn test_token_lookups_not_stalled_by_password_checks() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(open(&dir));
        let token = store.register("alice", "pw1").unwrap();

        let started = std::time::Instant::now();
        assert!(store.check("alice", "wrong").is_err());
        let one_check = started.elapsed();

        let checker = {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..4 {
                    assert!(store.check("alice", "wrong").is_err());
                }
            })
        };

        let mut slowest = std::time::Duration::ZERO;
        while !checker.is_finished() {
            let started = std::time::Instant::now();
            assert_eq!(store.resolve_token(&token).unwrap().as_deref(), Some("alice"));
            slowest = slowest.max(started.elapsed());
        }
        checker.join().unwrap();

        assert!(slowest < one_check / 2, "{slowest:?} vs {one_check:?}");
    }

    #[test]
    fn test_legacy_sha256_hash_upgraded() {
        let dir = TempDir::new().unwrap();
        let legacy = serde_json::json!({
            "users": {
                "alice": {
                    "pswd": hex::encode(Sha256::digest(b"pw1")),
                    "token": "abc-DEF-123-xyz-Q1w",
                    "modpacks": ["Ab12-cD34"]
                }
            },
            "link": { "abc-DEF-123-xyz-Q1w": "alice" }
        });
        std::fs::write(
            dir.path().join("users.json"),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();

        let store = open(&dir);
        assert!(matches!(
            store.check("alice", "wrong"),
            Err(SyncError::Unauthorized)
        ));
        assert_eq!(store.check("alice", "pw1").unwrap(), "abc-DEF-123-xyz-Q1w");

        let raw: UsersFile =
            serde_json::from_slice(&std::fs::read(dir.path().join("users.json")).unwrap())
                .unwrap();
        assert!(raw.users["alice"].password_hash.starts_with("$argon2"));
        assert_eq!(raw.users["alice"].owned_codes, vec!["Ab12-cD34".to_string()]);

        // Still works after the upgrade
        assert_eq!(store.check("alice", "pw1").unwrap(), "abc-DEF-123-xyz-Q1w");
    }
}
