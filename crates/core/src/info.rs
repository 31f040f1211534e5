//! Public info page for a modpack, as JSON or HTML

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use askama::Template;
use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::manifest::Modpack;
use crate::path::Category;

/// Output format of [`crate::SyncEngine::render_info`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InfoFormat {
    Json,
    #[default]
    Html,
}

impl FromStr for InfoFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            other => Err(SyncError::InvalidInput(format!(
                "unknown format {other:?}, expected json or html"
            ))),
        }
    }
}

impl fmt::Display for InfoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Html => "html",
        })
    }
}

/// View model for the HTML info page
#[derive(Template)]
#[template(path = "info.html")]
pub struct InfoView {
    pub title: String,
    pub code: String,
    pub owner: String,
    pub file_count: u64,
    pub total_size: String,
    pub updated: String,
    pub archive_name: String,
    pub locked: bool,
    /// Paths below `mods/`, in manifest order
    pub mods: Vec<String>,
    /// Full logical paths of everything else
    pub others: Vec<String>,
}

impl InfoView {
    /// Build the view; `archive_modified` is the mtime of the current archive
    #[must_use]
    pub fn new(
        modpack: &Modpack,
        archive_name: String,
        archive_modified: Option<SystemTime>,
    ) -> Self {
        let mods = modpack
            .category(Category::Mods)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        let others = Category::ALL
            .into_iter()
            .filter(|c| *c != Category::Mods)
            .filter_map(|c| modpack.category(c))
            .flat_map(|entries| entries.values().map(|r| r.logical_path.clone()))
            .collect();

        Self {
            title: modpack.name.clone().unwrap_or_else(|| modpack.code.clone()),
            code: modpack.code.clone(),
            owner: modpack.owner.clone(),
            file_count: modpack.file_count(),
            total_size: humansize::format_size(modpack.total_size(), humansize::BINARY),
            updated: archive_modified.map_or_else(
                || "never".to_string(),
                |t| {
                    DateTime::<Utc>::from(t)
                        .format("%Y-%m-%d %H:%M:%S UTC")
                        .to_string()
                },
            ),
            archive_name,
            locked: modpack.locked,
            mods,
            others,
        }
    }
}
