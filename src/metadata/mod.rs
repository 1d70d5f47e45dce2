//! Backup metadata persisted with every generation, and the WordPress
//! `meta.json` manifest merged into the archive.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs_ops::{self, FsError};
use crate::site::SiteSnapshot;

/// File name of the metadata record inside the working directory.
pub const METADATA_FILE: &str = "metadata.json";

/// File name of the WordPress manifest inside the archive.
pub const MANIFEST_FILE: &str = "meta.json";

/// Placeholder used when a count could not be collected.
pub const UNKNOWN_COUNT: &str = "-";

/// Errors raised while persisting or loading metadata.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MetadataError {
    /// Raised when the file cannot be read or written.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when the content cannot be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when serialisation fails.
    #[error("failed to serialise {path}: {message}")]
    Serialise {
        /// File that was being written.
        path: Utf8PathBuf,
        /// Serialiser error message.
        message: String,
    },
}

/// WordPress content figures as reported by WP-CLI.
///
/// Values are kept as reported, including the `-` placeholder; callers that
/// need numbers go through [`sanitize_count`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ContentCounts {
    /// Published posts.
    pub post_count: String,
    /// Pages.
    pub page_count: String,
    /// Comments.
    pub comment_count: String,
    /// Media attachments.
    pub upload_count: String,
    /// Installed plugins.
    pub plugin_count: String,
    /// Installed themes.
    pub theme_count: String,
    /// Users.
    pub user_count: String,
    /// WordPress core version.
    pub wp_version: String,
}

/// Record stored as `metadata.json` beside each generation.
///
/// The database password is deliberately absent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BackupMetadata {
    /// Site URL.
    pub site_url: String,
    /// Site type tag (`html`, `php`, `wp`).
    pub site_type: String,
    /// Database name when the site had a database.
    #[serde(default)]
    pub db_name: Option<String>,
    /// Container content path at backup time.
    pub site_container_fs_path: String,
    /// PHP version at backup time.
    #[serde(default)]
    pub php_version: Option<String>,
    /// Remote path of the generation without the remote name.
    pub remote_path: String,
    /// WordPress figures, for WordPress sites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordpress: Option<ContentCounts>,
}

impl BackupMetadata {
    /// Builds the record for `site` stored at `remote_path`.
    #[must_use]
    pub fn for_site(
        site: &SiteSnapshot,
        remote_path: impl Into<String>,
        wordpress: Option<ContentCounts>,
    ) -> Self {
        Self {
            site_url: site.url.clone(),
            site_type: site.kind.tag().to_owned(),
            db_name: site.kind.database().map(|db| db.name.clone()),
            site_container_fs_path: site.container_fs_path.clone(),
            php_version: site.php_version.clone(),
            remote_path: remote_path.into(),
            wordpress,
        }
    }

    /// Returns `true` when the backed up site had a database.
    #[must_use]
    pub fn has_database(&self) -> bool {
        self.db_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }

    /// Writes `metadata.json` into `work_dir` and copies it to
    /// `<backup_root>/<site>.metadata.json`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when serialising or writing fails.
    pub fn persist(&self, work_dir: &Utf8Path, backup_root: &Utf8Path) -> Result<(), MetadataError> {
        let path = work_dir.join(METADATA_FILE);
        let contents =
            serde_json::to_string_pretty(self).map_err(|err| MetadataError::Serialise {
                path: path.clone(),
                message: err.to_string(),
            })?;
        fs_ops::write(&path, &contents)?;
        fs_ops::copy(
            &path,
            &backup_root.join(format!("{}.metadata.json", self.site_url)),
        )?;
        Ok(())
    }

    /// Loads `metadata.json` from `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when the file is missing or malformed.
    pub fn load(work_dir: &Utf8Path) -> Result<Self, MetadataError> {
        let path = work_dir.join(METADATA_FILE);
        let contents = fs_ops::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|err| MetadataError::Parse {
            path,
            message: err.to_string(),
        })
    }
}

/// One plugin or theme in the WordPress inventory.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InventoryItem {
    /// Slug.
    pub name: String,
    /// Activation status.
    #[serde(default)]
    pub status: String,
    /// Installed version.
    #[serde(default)]
    pub version: String,
}

/// Contents of `meta.json`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaManifest {
    /// Site URL.
    pub site_url: String,
    /// PHP version at backup time.
    #[serde(default)]
    pub php_version: Option<String>,
    /// WordPress core version.
    pub wordpress_version: String,
    /// Installed plugins.
    #[serde(default)]
    pub plugins: Vec<InventoryItem>,
    /// Installed themes.
    #[serde(default)]
    pub themes: Vec<InventoryItem>,
}

impl MetaManifest {
    /// Writes the manifest to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when serialising or writing fails.
    pub fn write(&self, path: &Utf8Path) -> Result<(), MetadataError> {
        let contents =
            serde_json::to_string_pretty(self).map_err(|err| MetadataError::Serialise {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        fs_ops::write(path, &contents)?;
        Ok(())
    }

    /// Reads the manifest from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when the file is missing or malformed.
    pub fn read(path: &Utf8Path) -> Result<Self, MetadataError> {
        let contents = fs_ops::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|err| MetadataError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

/// Converts a reported count into a number.
///
/// The leading run of digits is kept, so `"12.5"` becomes 12. Placeholders,
/// negatives and anything else without leading digits become zero; values
/// too large for `u64` saturate.
#[must_use]
pub fn sanitize_count(raw: &str) -> u64 {
    let trimmed = raw.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits = unsigned
        .split(|ch: char| !ch.is_ascii_digit())
        .next()
        .unwrap_or_default();
    if digits.is_empty() {
        return 0;
    }
    digits.parse().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
