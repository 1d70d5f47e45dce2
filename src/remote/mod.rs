//! Remote generation store backed by `rclone`.
//!
//! Generations live at `<remote>:<base>/<site>/<backup-id>/`. Listing,
//! transfer and deletion are delegated to `rclone`; this module only builds
//! the commands, tunes transfers for the host and interprets the output.

use std::ffi::OsString;
use std::fmt;

use camino::Utf8Path;
use chrono::Local;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError, os_args};

mod retention;
mod tuning;

pub use retention::{DEFAULT_KEEP, PruneSummary, RetentionPolicy};
pub use tuning::{DownloadTuning, HostResources, UploadTuning};

/// Default `rclone` binary.
pub const DEFAULT_RCLONE_BIN: &str = "rclone";

/// Shape every generation directory name carries.
const TIMESTAMP_PATTERN: &str = "dddd-dd-dd-dd-dd-dd";

/// Errors raised by the remote store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when `rclone` cannot be started.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when an `rclone` operation exits unsuccessfully.
    #[error("remote {operation} of {path} failed: {source}")]
    Transfer {
        /// `list`, `upload`, `download`, `size` or `purge`.
        operation: &'static str,
        /// Remote path the operation targeted.
        path: String,
        /// Underlying process error.
        source: ProcessError,
    },
    /// Raised when a requested backup ID is not in the remote listing.
    #[error(
        "Invalid backup ID provided.\nPlease provide a valid ID from the list using 'ee site backup --list {site}'."
    )]
    InvalidBackupId {
        /// Site whose generations were searched.
        site: String,
    },
    /// Raised when a restore finds no generation to use.
    #[error("no remote backups found for {site}")]
    NoGenerations {
        /// Site whose generations were searched.
        site: String,
    },
    /// Raised when `rclone` output cannot be interpreted.
    #[error("failed to parse rclone {operation} output: {message}")]
    Parse {
        /// Operation whose output was parsed.
        operation: &'static str,
        /// Parser error message.
        message: String,
    },
}

/// Sortable identifier of one generation: `<epoch>_<YYYY-MM-DD-HH-MM-SS>`.
///
/// Identifiers sort lexically, so the greatest identifier is the most recent
/// generation.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BackupId(String);

impl BackupId {
    /// Identifier for a generation taken now, in local time.
    #[must_use]
    pub fn generate() -> Self {
        let now = Local::now();
        Self(format!(
            "{}_{}",
            now.timestamp(),
            now.format("%Y-%m-%d-%H-%M-%S")
        ))
    }

    /// Accepts a listing entry (with or without a trailing `/`) when it
    /// carries a generation timestamp.
    #[must_use]
    pub fn from_listing(entry: &str) -> Option<Self> {
        let name = entry.trim().trim_end_matches('/');
        contains_timestamp(name).then(|| Self(name.to_owned()))
    }

    /// Identifier as written in remote paths.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn contains_timestamp(name: &str) -> bool {
    name.as_bytes()
        .windows(TIMESTAMP_PATTERN.len())
        .any(|window| {
            TIMESTAMP_PATTERN
                .bytes()
                .zip(window)
                .all(|(expected, actual)| match expected {
                    b'd' => actual.is_ascii_digit(),
                    _ => *actual == expected,
                })
        })
}

#[derive(Debug, Deserialize)]
struct SizeReport {
    bytes: u64,
}

/// Runs `rclone` against the configured `<remote>:<base>` endpoint.
#[derive(Clone, Debug)]
pub struct RemoteStore<R: CommandRunner> {
    runner: R,
    rclone_bin: String,
    endpoint: String,
}

impl RemoteStore<ProcessCommandRunner> {
    /// Creates a store wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(rclone_bin: &str, endpoint: &str) -> Self {
        Self::new(ProcessCommandRunner, rclone_bin, endpoint)
    }
}

impl<R: CommandRunner> RemoteStore<R> {
    /// Creates a store for `endpoint`, for example `easyengine:easyengine`.
    pub fn new(runner: R, rclone_bin: &str, endpoint: &str) -> Self {
        Self {
            runner,
            rclone_bin: rclone_bin.to_owned(),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
        }
    }

    /// Name of the configured remote, the part before `:`.
    #[must_use]
    pub fn remote_name(&self) -> &str {
        self.endpoint
            .split_once(':')
            .map_or(self.endpoint.as_str(), |(name, _)| name)
    }

    /// Remote directory holding every generation of `site`.
    #[must_use]
    pub fn site_path(&self, site: &str) -> String {
        format!("{}/{site}", self.endpoint)
    }

    /// Remote directory of one generation.
    #[must_use]
    pub fn generation_path(&self, site: &str, id: &BackupId) -> String {
        format!("{}/{site}/{id}", self.endpoint)
    }

    fn rclone(&self, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        self.runner.run(&self.rclone_bin, args)
    }

    fn checked(
        &self,
        operation: &'static str,
        path: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, RemoteError> {
        self.rclone(args)?
            .require_success(&self.rclone_bin)
            .map_err(|source| RemoteError::Transfer {
                operation,
                path: path.to_owned(),
                source,
            })
    }

    /// First line of `rclone --version`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when `rclone` is missing or fails.
    pub fn version(&self) -> Result<String, RemoteError> {
        let output = self
            .rclone(&os_args(["--version"]))?
            .require_success(&self.rclone_bin)?;
        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_owned())
    }

    /// Configured remotes as printed by `rclone listremotes` (`name:`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the command fails.
    pub fn remotes(&self) -> Result<Vec<String>, RemoteError> {
        let output = self
            .rclone(&os_args(["listremotes"]))?
            .require_success(&self.rclone_bin)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Returns `true` when the remote's configuration names an S3 backend.
    ///
    /// A failing `rclone config show` is treated as "not S3".
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Process`] when `rclone` cannot be started.
    pub fn backend_is_s3(&self) -> Result<bool, RemoteError> {
        let output = self.rclone(&os_args(["config", "show", self.remote_name()]))?;
        if !output.is_success() {
            debug!(remote = self.remote_name(), "remote configuration unavailable");
            return Ok(false);
        }
        Ok(output
            .stdout
            .lines()
            .filter(|line| line.trim_start().starts_with("type"))
            .any(|line| line.contains("s3")))
    }

    /// Generations of `site`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the listing fails.
    pub fn list_generations(&self, site: &str) -> Result<Vec<BackupId>, RemoteError> {
        let path = self.site_path(site);
        let output = self.checked("list", &path, &os_args(["lsf", "--dirs-only", path.as_str()]))?;
        let mut generations: Vec<BackupId> = output
            .stdout
            .lines()
            .filter_map(BackupId::from_listing)
            .collect();
        generations.sort_unstable_by(|left, right| right.cmp(left));
        Ok(generations)
    }

    /// Picks the generation to restore: `requested` when it is listed,
    /// otherwise the most recent one.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidBackupId`] for an unlisted ID and
    /// [`RemoteError::NoGenerations`] when nothing is stored.
    pub fn select_generation(
        &self,
        site: &str,
        requested: Option<&str>,
    ) -> Result<BackupId, RemoteError> {
        let generations = self.list_generations(site)?;
        if let Some(raw) = requested {
            let wanted = raw.trim().trim_end_matches('/');
            return generations
                .into_iter()
                .find(|id| id.as_str() == wanted)
                .ok_or_else(|| RemoteError::InvalidBackupId {
                    site: site.to_owned(),
                });
        }
        generations
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NoGenerations {
                site: site.to_owned(),
            })
    }

    /// Total size in bytes of everything below `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the query fails or its output is not the
    /// expected JSON.
    pub fn generation_size(&self, path: &str) -> Result<u64, RemoteError> {
        let output = self.checked("size", path, &os_args(["size", "--json", path]))?;
        let report: SizeReport =
            serde_json::from_str(output.stdout.trim()).map_err(|err| RemoteError::Parse {
                operation: "size",
                message: err.to_string(),
            })?;
        Ok(report.bytes)
    }

    /// Copies the contents of `local` to `remote_path`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transfer`] when the copy fails.
    pub fn upload(
        &self,
        local: &Utf8Path,
        remote_path: &str,
        tuning: &UploadTuning,
    ) -> Result<(), RemoteError> {
        info!(path = %remote_path, "uploading backup to remote storage");
        let mut args = os_args(["copy"]);
        args.extend(tuning.args());
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(remote_path));
        self.checked("upload", remote_path, &args)?;
        Ok(())
    }

    /// Lists what landed at `remote_path` after an upload.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transfer`] when the listing fails.
    pub fn confirm(&self, remote_path: &str) -> Result<String, RemoteError> {
        let output = self.checked("list", remote_path, &os_args(["lsf", remote_path]))?;
        Ok(output.stdout.trim().to_owned())
    }

    /// Copies `remote_path` into `local`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transfer`] when the copy fails.
    pub fn download(
        &self,
        remote_path: &str,
        local: &Utf8Path,
        tuning: &DownloadTuning,
    ) -> Result<(), RemoteError> {
        info!(path = %remote_path, "downloading backup from remote storage");
        let mut args = os_args(["copy"]);
        args.extend(tuning.args());
        args.push(OsString::from(remote_path));
        args.push(OsString::from(local.as_str()));
        self.checked("download", remote_path, &args)?;
        Ok(())
    }

    /// Deletes `remote_path` and everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transfer`] when the purge fails.
    pub fn purge(&self, remote_path: &str) -> Result<(), RemoteError> {
        self.checked("purge", remote_path, &os_args(["purge", remote_path]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
