//! Short human-typeable keys: modpack codes and user tokens
//!
//! Uniqueness is not reserved in advance. A drawn candidate is handed to a
//! `claim` callback that atomically takes it in storage; a `Conflict` from the
//! callback means the key is taken and a new one is drawn.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Upper bound on draws before giving up on a pathological key space
pub const MAX_ATTEMPTS: usize = 1000;

/// Layout of a generated key: `groups` runs of mixed-case alphanumerics,
/// each `min_len..=max_len` long, joined with `-`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyShape {
    pub groups: usize,
    pub min_len: usize,
    pub max_len: usize,
}

impl KeyShape {
    /// Modpack codes, e.g. `aB3x-Q9rTz`
    pub const CODE: Self = Self {
        groups: 2,
        min_len: 4,
        max_len: 5,
    };

    /// User tokens, e.g. `x7Q-kk2P-0aZ-Hh1-pQr`
    pub const TOKEN: Self = Self {
        groups: 5,
        min_len: 3,
        max_len: 4,
    };

    /// Check that the shape yields a usable key space.
    ///
    /// # Errors
    /// Returns a description of the problem
    pub fn validate(&self) -> Result<(), String> {
        if self.groups == 0 {
            return Err("groups must be at least 1".to_string());
        }
        if self.min_len < 3 {
            return Err(format!("min_len must be at least 3, got {}", self.min_len));
        }
        if self.min_len > self.max_len {
            return Err(format!(
                "min_len {} exceeds max_len {}",
                self.min_len, self.max_len
            ));
        }
        if self.max_len > 32 {
            return Err(format!("max_len must be at most 32, got {}", self.max_len));
        }
        Ok(())
    }

    /// Draw one key
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let mut key = String::with_capacity(self.groups * (self.max_len + 1));
        for group in 0..self.groups {
            if group > 0 {
                key.push('-');
            }
            let len = rng.random_range(self.min_len..=self.max_len);
            key.extend((0..len).map(|_| char::from(rng.sample(Alphanumeric))));
        }
        key
    }

    /// Whether `key` could have been produced by this shape
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        let groups: Vec<&str> = key.split('-').collect();
        groups.len() == self.groups
            && groups.iter().all(|g| {
                (self.min_len..=self.max_len).contains(&g.len())
                    && g.bytes().all(|b| b.is_ascii_alphanumeric())
            })
    }
}

/// Draws keys until one can be claimed
#[derive(Debug, Clone)]
pub struct CodeAllocator {
    shape: KeyShape,
}

impl CodeAllocator {
    #[must_use]
    pub fn new(shape: KeyShape) -> Self {
        Self { shape }
    }

    #[must_use]
    pub fn shape(&self) -> KeyShape {
        self.shape
    }

    /// Allocate a fresh key using the thread-local RNG.
    ///
    /// # Errors
    /// Propagates any non-`Conflict` error from `claim`, or fails once
    /// `MAX_ATTEMPTS` draws all collided
    pub fn allocate<F>(&self, claim: F) -> Result<String, SyncError>
    where
        F: FnMut(&str) -> Result<(), SyncError>,
    {
        self.allocate_with(&mut rand::rng(), claim)
    }

    /// Allocate a fresh key with an explicit RNG.
    ///
    /// # Errors
    /// Same as [`CodeAllocator::allocate`]
    pub fn allocate_with<R, F>(&self, rng: &mut R, mut claim: F) -> Result<String, SyncError>
    where
        R: Rng + ?Sized,
        F: FnMut(&str) -> Result<(), SyncError>,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let candidate = self.shape.generate(rng);
            match claim(&candidate) {
                Ok(()) => {
                    info!(code = %candidate, attempt, "allocated key");
                    return Ok(candidate);
                }
                Err(SyncError::Conflict(taken)) => {
                    debug!(code = %taken, attempt, "key collision, drawing again");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(attempts = MAX_ATTEMPTS, "key space exhausted");
        Err(SyncError::Io(std::io::Error::other(format!(
            "no free key after {MAX_ATTEMPTS} attempts"
        ))))
    }
}
