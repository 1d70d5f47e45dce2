//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `site-backup.toml` and `SITE_BACKUP_*` environment
//! variables in that order of precedence.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::archive::ArchiveBinaries;
use crate::remote::RetentionPolicy;

/// Default working root for backups, locks and metadata copies.
pub const DEFAULT_BACKUP_ROOT: &str = "/opt/easyengine/.backup";

/// Default root of per-site trees.
pub const DEFAULT_SITES_ROOT: &str = "/opt/easyengine/sites";

/// Default `<remote>:<base>` endpoint.
pub const DEFAULT_RCLONE_PATH: &str = "easyengine:easyengine";

/// Backup engine settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SITE_BACKUP",
    discovery(
        app_name = "site-backup",
        env_var = "SITE_BACKUP_CONFIG_PATH",
        config_file_name = "site-backup.toml",
        dotfile_name = ".site-backup.toml",
        project_file_name = "site-backup.toml"
    )
)]
pub struct BackupConfig {
    /// Working root holding per-site work directories, locks and metadata
    /// copies.
    #[ortho_config(default = DEFAULT_BACKUP_ROOT.to_owned())]
    pub backup_root: String,
    /// Root of the per-site trees managed by `ee`.
    #[ortho_config(default = DEFAULT_SITES_ROOT.to_owned())]
    pub sites_root: String,
    /// Path to the `rclone` executable.
    #[ortho_config(default = "rclone".to_owned())]
    pub rclone_bin: String,
    /// Remote endpoint as `<remote>:<base>`.
    #[ortho_config(default = DEFAULT_RCLONE_PATH.to_owned())]
    pub rclone_path: String,
    /// Generations kept per site.
    #[ortho_config(default = 7)]
    pub no_of_backups: u64,
    /// Base URL of the dashboard API; required for `--dash-auth`.
    pub ed_api_url: Option<String>,
    /// Delay between dashboard callback attempts, in seconds.
    #[ortho_config(default = 300)]
    pub dash_retry_delay_secs: u64,
    /// Path to the `ee` site manager.
    #[ortho_config(default = "ee".to_owned())]
    pub ee_bin: String,
    /// Path to the `7z` archiver.
    #[ortho_config(default = "7z".to_owned())]
    pub seven_zip_bin: String,
    /// Path to `unzip`.
    #[ortho_config(default = "unzip".to_owned())]
    pub unzip_bin: String,
    /// Path to `rsync`.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Owner applied to restored files.
    #[ortho_config(default = "www-data".to_owned())]
    pub runtime_user: String,
    /// Log filter used when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl BackupConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to site-backup.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("site-backup")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.backup_root,
                FieldMetadata::new("backup root", "SITE_BACKUP_BACKUP_ROOT", "backup_root"),
            ),
            (
                &self.sites_root,
                FieldMetadata::new("sites root", "SITE_BACKUP_SITES_ROOT", "sites_root"),
            ),
            (
                &self.rclone_bin,
                FieldMetadata::new("rclone binary", "SITE_BACKUP_RCLONE_BIN", "rclone_bin"),
            ),
            (
                &self.rclone_path,
                FieldMetadata::new("rclone remote path", "SITE_BACKUP_RCLONE_PATH", "rclone_path"),
            ),
            (
                &self.ee_bin,
                FieldMetadata::new("site manager binary", "SITE_BACKUP_EE_BIN", "ee_bin"),
            ),
            (
                &self.seven_zip_bin,
                FieldMetadata::new("7z binary", "SITE_BACKUP_SEVEN_ZIP_BIN", "seven_zip_bin"),
            ),
            (
                &self.unzip_bin,
                FieldMetadata::new("unzip binary", "SITE_BACKUP_UNZIP_BIN", "unzip_bin"),
            ),
            (
                &self.rsync_bin,
                FieldMetadata::new("rsync binary", "SITE_BACKUP_RSYNC_BIN", "rsync_bin"),
            ),
            (
                &self.runtime_user,
                FieldMetadata::new("runtime user", "SITE_BACKUP_RUNTIME_USER", "runtime_user"),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        if !self.rclone_path.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "rclone_path must look like <remote>:<base>, got {}",
                self.rclone_path
            )));
        }
        if self.no_of_backups == 0 {
            return Err(ConfigError::Invalid(String::from(
                "no_of_backups must be at least 1 (SITE_BACKUP_NO_OF_BACKUPS)",
            )));
        }
        Ok(())
    }

    /// Working root as a path.
    #[must_use]
    pub fn backup_root_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.backup_root)
    }

    /// Retention policy for the configured count.
    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(usize::try_from(self.no_of_backups).unwrap_or(usize::MAX))
    }

    /// Delay between dashboard callback attempts.
    #[must_use]
    pub const fn dash_retry_delay(&self) -> Duration {
        Duration::from_secs(self.dash_retry_delay_secs)
    }

    /// Archive and copy binaries.
    #[must_use]
    pub fn archive_binaries(&self) -> ArchiveBinaries {
        ArchiveBinaries {
            seven_zip: self.seven_zip_bin.clone(),
            unzip: self.unzip_bin.clone(),
            rsync: self.rsync_bin.clone(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
