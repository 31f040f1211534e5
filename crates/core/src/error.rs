//! Error taxonomy for the sync engine

use serde::Serialize;
use thiserror::Error;

/// Errors returned by engine operations.
///
/// Client-facing variants come first; everything from `Config` down is an
/// internal failure of the storage below the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("modpack not found: {0}")]
    NotFound(String),

    #[error("invalid or unknown token")]
    Unauthorized,

    #[error("{user} is not the owner of modpack {code}")]
    Forbidden { user: String, code: String },

    #[error("modpack {0} is locked")]
    Locked(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A freshly drawn code already exists. Retried by the allocator.
    #[error("code {0} is already taken")]
    Conflict(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("password hashing failed: {0}")]
    Password(String),

    #[error("template rendering failed: {0}")]
    Render(#[from] askama::Error),
}

impl SyncError {
    /// Whether this error comes from the storage layer rather than the request.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_)
                | Self::Config(_)
                | Self::Io(_)
                | Self::Json(_)
                | Self::Password(_)
                | Self::Render(_)
        )
    }

    /// Short machine-readable kind, stable across message wording changes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::Locked(_) => "locked",
            Self::InvalidInput(_) => "invalid_input",
            _ => "internal",
        }
    }
}

/// Structured error body handed back at the request boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl From<&SyncError> for ErrorResponse {
    fn from(err: &SyncError) -> Self {
        // Storage details stay in the logs.
        let error = if err.is_internal() {
            "internal error".to_string()
        } else {
            err.to_string()
        };
        Self {
            error,
            kind: err.kind(),
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
