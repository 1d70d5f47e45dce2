//! Archive tool wrapper plus the per-site-type composition and extraction
//! policies built on top of it.
//!
//! Archives are written with `7z` at the fastest compression level and read
//! back with `unzip`, so a generation can be unpacked on any host.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::database::DatabaseError;
use crate::fs_ops::FsError;
use crate::metadata::MetadataError;
use crate::process::{CommandRunner, ProcessError, os_args};

mod compose;
mod unpack;

pub use compose::{ArchiveComposer, ComposedArchives};
pub use unpack::{ArchiveUnpacker, extracted_sql};

/// Archive holding nginx and php settings.
pub const CONFIG_ARCHIVE: &str = "conf.zip";

/// Archive holding the user compose directory.
pub const OVERLAY_ARCHIVE: &str = "user-docker-compose.zip";

/// `7z` exit code for non-fatal warnings such as unreadable files.
const SEVEN_ZIP_WARNING: i32 = 1;

/// `unzip` exit codes for warnings and for patterns that matched nothing.
const UNZIP_WARNING: i32 = 1;
const UNZIP_NOTHING_MATCHED: i32 = 11;

/// Errors raised while composing or extracting archives.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArchiveError {
    /// Raised when an archive or ownership command fails.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when the working tree cannot be prepared.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when the database dump or replay fails.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// Raised when the WordPress manifest cannot be handled.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// How `7z` treats the archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveMode {
    /// `7z a`: add members, creating the archive.
    Add,
    /// `7z u`: update members in an existing archive.
    Update,
}

impl ArchiveMode {
    const fn verb(self) -> &'static str {
        match self {
            Self::Add => "a",
            Self::Update => "u",
        }
    }
}

/// One `7z` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Compress {
    /// Add or update.
    pub mode: ArchiveMode,
    /// Directory member paths are relative to.
    pub working_dir: Utf8PathBuf,
    /// Archive to write.
    pub archive: Utf8PathBuf,
    /// Members to include.
    pub members: Vec<String>,
    /// Store symlinks as links instead of following them.
    pub store_links: bool,
    /// Member paths to leave out.
    pub excludes: Vec<String>,
}

impl Compress {
    /// Starts a request that adds `members` from `working_dir`.
    #[must_use]
    pub fn add(working_dir: &Utf8Path, archive: &Utf8Path, members: &[&str]) -> Self {
        Self {
            mode: ArchiveMode::Add,
            working_dir: working_dir.to_path_buf(),
            archive: archive.to_path_buf(),
            members: members.iter().map(|member| (*member).to_owned()).collect(),
            store_links: false,
            excludes: Vec::new(),
        }
    }

    /// Starts a request that updates `members` from `working_dir`.
    #[must_use]
    pub fn update(working_dir: &Utf8Path, archive: &Utf8Path, members: &[&str]) -> Self {
        Self {
            mode: ArchiveMode::Update,
            ..Self::add(working_dir, archive, members)
        }
    }

    /// Stores symlinks as links.
    #[must_use]
    pub const fn storing_links(mut self) -> Self {
        self.store_links = true;
        self
    }

    /// Leaves `path` and everything below it out of the archive.
    #[must_use]
    pub fn excluding(mut self, path: &str) -> Self {
        self.excludes.push(path.to_owned());
        self
    }

    fn args(&self) -> Vec<OsString> {
        let mut args = os_args([self.mode.verb()]);
        if self.store_links {
            args.push(OsString::from("-snl"));
        }
        args.push(OsString::from("-mx=1"));
        args.push(OsString::from(self.archive.as_str()));
        args.extend(self.members.iter().map(OsString::from));
        for exclude in &self.excludes {
            args.push(OsString::from(format!("-x!{exclude}")));
            args.push(OsString::from(format!("-x!{exclude}/*")));
        }
        args
    }
}

/// One `unzip` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Extract {
    /// Archive to read.
    pub archive: Utf8PathBuf,
    /// Member patterns; empty extracts everything.
    pub patterns: Vec<String>,
    /// Member patterns to skip.
    pub excludes: Vec<String>,
    /// Destination directory.
    pub destination: Utf8PathBuf,
}

impl Extract {
    /// Extracts the whole of `archive` into `destination`.
    #[must_use]
    pub fn all(archive: &Utf8Path, destination: &Utf8Path) -> Self {
        Self {
            archive: archive.to_path_buf(),
            patterns: Vec::new(),
            excludes: Vec::new(),
            destination: destination.to_path_buf(),
        }
    }

    /// Extracts only members matching `patterns`.
    #[must_use]
    pub fn members(archive: &Utf8Path, patterns: &[&str], destination: &Utf8Path) -> Self {
        Self {
            patterns: patterns.iter().map(|pattern| (*pattern).to_owned()).collect(),
            ..Self::all(archive, destination)
        }
    }

    /// Skips members matching `pattern`.
    #[must_use]
    pub fn excluding(mut self, pattern: &str) -> Self {
        self.excludes.push(pattern.to_owned());
        self
    }

    fn args(&self) -> Vec<OsString> {
        let mut args = os_args(["-o", self.archive.as_str()]);
        args.extend(self.patterns.iter().map(OsString::from));
        if !self.excludes.is_empty() {
            args.push(OsString::from("-x"));
            args.extend(self.excludes.iter().map(OsString::from));
        }
        args.push(OsString::from("-d"));
        args.push(OsString::from(self.destination.as_str()));
        args
    }
}

/// Binaries used by [`ArchiveTool`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveBinaries {
    /// Archiver used for writing.
    pub seven_zip: String,
    /// Extractor used for reading.
    pub unzip: String,
    /// Copier used to lay configuration back over the site tree.
    pub rsync: String,
}

impl Default for ArchiveBinaries {
    fn default() -> Self {
        Self {
            seven_zip: String::from("7z"),
            unzip: String::from("unzip"),
            rsync: String::from("rsync"),
        }
    }
}

/// Runs `7z`, `unzip`, `rsync` and `chown` through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct ArchiveTool<R: CommandRunner> {
    runner: R,
    binaries: ArchiveBinaries,
}

impl<R: CommandRunner> ArchiveTool<R> {
    /// Builds a tool using the given binaries.
    pub const fn new(runner: R, binaries: ArchiveBinaries) -> Self {
        Self { runner, binaries }
    }

    /// Runs a `7z` request. Warnings are logged and tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Process`] on spawn failure or a fatal exit.
    pub fn compress(&self, request: &Compress) -> Result<(), ArchiveError> {
        let output = self.runner.run_in(
            Some(request.working_dir.as_path()),
            &self.binaries.seven_zip,
            &request.args(),
        )?;
        if output.is_success() {
            return Ok(());
        }
        if output.exited_with_any(&[SEVEN_ZIP_WARNING]) {
            warn!(
                archive = %request.archive,
                stderr = %output.stderr.trim(),
                "archiver reported warnings"
            );
            return Ok(());
        }
        Err(output.into_failure(&self.binaries.seven_zip).into())
    }

    /// Runs an `unzip` request, overwriting existing files.
    ///
    /// Returns `false` when the patterns matched nothing in the archive.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Process`] on spawn failure or a fatal exit.
    pub fn extract(&self, request: &Extract) -> Result<bool, ArchiveError> {
        let output = self.runner.run(&self.binaries.unzip, &request.args())?;
        if output.is_success() {
            return Ok(true);
        }
        if output.exited_with_any(&[UNZIP_NOTHING_MATCHED]) {
            return Ok(false);
        }
        if output.exited_with_any(&[UNZIP_WARNING]) {
            warn!(
                archive = %request.archive,
                stderr = %output.stderr.trim(),
                "extraction reported warnings"
            );
            return Ok(true);
        }
        Err(output.into_failure(&self.binaries.unzip).into())
    }

    /// Hands `path` and everything below it to `owner` (`user:group`).
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Process`] when `chown` fails.
    pub fn chown(&self, path: &Utf8Path, owner: &str) -> Result<(), ArchiveError> {
        self.runner
            .run("chown", &os_args(["-R", owner, path.as_str()]))?
            .require_success("chown")?;
        Ok(())
    }

    /// Copies `source` over `destination` with `rsync -a`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Process`] when `rsync` fails.
    pub fn sync(&self, source: &str, destination: &str) -> Result<(), ArchiveError> {
        let rsync = &self.binaries.rsync;
        self.runner
            .run(rsync, &os_args(["-a", source, destination]))?
            .require_success(rsync)?;
        Ok(())
    }
}
