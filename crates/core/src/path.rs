//! Logical upload paths and their categories
//!
//! Every uploaded file must name its category explicitly as the first path
//! segment, e.g. `mods/sodium.jar` or `config/sodium/options.json`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Name prefix of in-flight staging files; never valid in an upload path
pub(crate) const STAGING_PREFIX: &str = ".modsync-";

/// Top-level category a modpack file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Mods,
    Config,
}

impl Category {
    pub const ALL: [Self; 2] = [Self::Mods, Self::Config];

    /// Directory name inside the modpack
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mods => "mods",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mods" => Ok(Self::Mods),
            "config" => Ok(Self::Config),
            other => Err(SyncError::InvalidInput(format!(
                "unknown category {other:?}, expected mods or config"
            ))),
        }
    }
}

/// A validated, normalized path of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadPath {
    category: Category,
    /// Path below the category directory, `/`-separated
    key: String,
}

impl UploadPath {
    /// Parse a client-supplied path.
    ///
    /// Backslashes count as separators, a leading `/` or `./` is ignored.
    /// The first segment must be `mods` or `config` and at least one segment
    /// must follow it. Empty, `.` and `..` segments are rejected.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the path does not satisfy the rules above
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let normalized = raw.replace('\\', "/");
        let mut trimmed = normalized.trim_start_matches('/');
        while let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest.trim_start_matches('/');
        }

        let mut segments = trimmed.split('/');
        let category = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::InvalidInput(format!("empty upload path {raw:?}")))?
            .parse::<Category>()
            .map_err(|_| {
                SyncError::InvalidInput(format!(
                    "upload path {raw:?} must start with mods/ or config/"
                ))
            })?;

        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return Err(SyncError::InvalidInput(format!(
                "upload path {raw:?} names no file"
            )));
        }
        if let Some(bad) = rest
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == ".." || s.starts_with(STAGING_PREFIX))
        {
            return Err(SyncError::InvalidInput(format!(
                "upload path {raw:?} contains invalid segment {bad:?}"
            )));
        }

        Ok(Self {
            category,
            key: rest.join("/"),
        })
    }

    /// Build an upload path from a local file under `root`.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `file` is not below `root` or the relative
    /// path is not a valid upload path
    pub fn relative_to(root: &Path, file: &Path) -> Result<Self, SyncError> {
        let relative = file.strip_prefix(root).map_err(|_| {
            SyncError::InvalidInput(format!(
                "{} is not inside {}",
                file.display(),
                root.display()
            ))
        })?;
        Self::parse(&relative.to_string_lossy())
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Manifest key within the category (`foo.jar`, `sub/opts.cfg`)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Final path segment
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Keys of the directories above this file, outermost first
    pub fn parent_keys(&self) -> impl Iterator<Item = &str> {
        self.key.match_indices('/').map(|(i, _)| &self.key[..i])
    }

    /// Full logical path, `category/key`
    #[must_use]
    pub fn logical(&self) -> String {
        format!("{}/{}", self.category, self.key)
    }

    /// Location of this file under a modpack directory
    #[must_use]
    pub fn to_fs_path(&self, modpack_dir: &Path) -> PathBuf {
        let mut path = modpack_dir.join(self.category.as_str());
        path.extend(self.key.split('/'));
        path
    }
}

impl fmt::Display for UploadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_mod() {
        let p = UploadPath::parse("mods/sodium.jar").unwrap();
        assert_eq!(p.category(), Category::Mods);
        assert_eq!(p.key(), "sodium.jar");
        assert_eq!(p.logical(), "mods/sodium.jar");
    }

    #[test]
    fn test_parse_nested_config_with_backslashes() {
        let p = UploadPath::parse(r"config\sodium\options.json").unwrap();
        assert_eq!(p.category(), Category::Config);
        assert_eq!(p.key(), "sodium/options.json");
        assert_eq!(p.file_name(), "options.json");
    }

    #[test]
    fn test_parent_keys() {
        let p = UploadPath::parse("config/a/b/c.cfg").unwrap();
        assert_eq!(p.parent_keys().collect::<Vec<_>>(), vec!["a", "a/b"]);
        assert_eq!(UploadPath::parse("mods/x.jar").unwrap().parent_keys().count(), 0);
    }

    #[test]
    fn test_parse_strips_leading_separators() {
        assert_eq!(
            UploadPath::parse("./mods/a.jar").unwrap(),
            UploadPath::parse("/mods/a.jar").unwrap()
        );
    }

    #[test]
    fn test_parse_requires_top_level_category() {
        // A category buried deeper in the path is not accepted.
        assert!(UploadPath::parse("minecraft/mods/a.jar").is_err());
        assert!(UploadPath::parse("resourcepacks/a.zip").is_err());
        assert!(UploadPath::parse("modsx/a.jar").is_err());
        assert!(UploadPath::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_segments() {
        assert!(UploadPath::parse("mods").is_err());
        assert!(UploadPath::parse("mods/").is_err());
        assert!(UploadPath::parse("mods/../info.json").is_err());
        assert!(UploadPath::parse("config/a//b.cfg").is_err());
        assert!(UploadPath::parse("config/./b.cfg").is_err());
        assert!(UploadPath::parse("mods/.modsync-stage").is_err());
    }

    #[test]
    fn test_relative_to_root() {
        let root = Path::new("/games/pack");
        let p = UploadPath::relative_to(root, Path::new("/games/pack/config/x/y.toml")).unwrap();
        assert_eq!(p.logical(), "config/x/y.toml");
        assert!(UploadPath::relative_to(root, Path::new("/elsewhere/mods/a.jar")).is_err());
    }

    #[test]
    fn test_fs_path_stays_inside_modpack() {
        let p = UploadPath::parse("config/a/b.cfg").unwrap();
        let dir = Path::new("/data/modpacks/ab12-CD34");
        assert_eq!(p.to_fs_path(dir), dir.join("config").join("a").join("b.cfg"));
    }
}
