//! Directory sizing, free-space probing and the shortfall report shown when
//! a backup or restore would not fit on disk.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Errors raised while inspecting the file system.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DiskError {
    /// Raised when the directory to measure does not exist.
    #[error("directory does not exist: {path}")]
    NotFound {
        /// Directory that was expected.
        path: Utf8PathBuf,
    },
    /// Raised when free space cannot be determined.
    #[error("unable to determine free disk space for {path}: {message}")]
    FreeSpace {
        /// Path whose file system was queried.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Source of size and free-space figures for preflight checks.
pub trait SpaceProbe {
    /// Sums the sizes of readable regular files below `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::NotFound`] when `path` is absent.
    fn directory_size(&self, path: &Utf8Path) -> Result<u64, DiskError>;

    /// Returns the bytes available to unprivileged users on the file system
    /// holding `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::FreeSpace`] when the query fails.
    fn free_space(&self, path: &Utf8Path) -> Result<u64, DiskError>;
}

/// [`SpaceProbe`] backed by the host file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostDisk;

impl SpaceProbe for HostDisk {
    fn directory_size(&self, path: &Utf8Path) -> Result<u64, DiskError> {
        directory_size(path)
    }

    fn free_space(&self, path: &Utf8Path) -> Result<u64, DiskError> {
        free_space(path)
    }
}

/// Recursively sums file sizes below `path`, skipping entries that cannot be
/// read. Symlinks are not followed.
///
/// # Errors
///
/// Returns [`DiskError::NotFound`] when `path` does not exist.
pub fn directory_size(path: &Utf8Path) -> Result<u64, DiskError> {
    if !path.exists() {
        return Err(DiskError::NotFound {
            path: path.to_path_buf(),
        });
    }
    debug!(%path, "calculating directory size");

    let size = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .fold(0_u64, |total, meta| total.saturating_add(meta.len()));

    debug!(%path, size, "directory size calculated");
    Ok(size)
}

/// Returns the bytes available to unprivileged users on the file system
/// holding `path`.
///
/// # Errors
///
/// Returns [`DiskError::FreeSpace`] when `statvfs` fails.
pub fn free_space(path: &Utf8Path) -> Result<u64, DiskError> {
    let stats =
        nix::sys::statvfs::statvfs(path.as_std_path()).map_err(|err| DiskError::FreeSpace {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    let blocks = u64::from(stats.blocks_available());
    let fragment = u64::from(stats.fragment_size());
    Ok(blocks.saturating_mul(fragment))
}

/// Which operation a space check guards; selects the shortfall wording.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpaceOperation {
    /// Taking a new backup.
    Backup,
    /// Restoring an existing generation.
    Restore,
}

impl SpaceOperation {
    const fn headline(self) -> &'static str {
        match self {
            Self::Backup => "Not enough disk space to take backup.",
            Self::Restore => "Not enough disk space to restore backup.",
        }
    }
}

/// Report produced when the required bytes exceed what is available.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shortfall {
    /// Operation that was refused.
    pub operation: SpaceOperation,
    /// Bytes the operation needs.
    pub required: u64,
    /// Bytes currently free.
    pub available: u64,
}

impl Shortfall {
    /// Compares `required` against `available`, returning a report when the
    /// operation would not fit.
    #[must_use]
    pub const fn check(operation: SpaceOperation, required: u64, available: u64) -> Option<Self> {
        if required > available {
            Some(Self {
                operation,
                required,
                available,
            })
        } else {
            None
        }
    }

    /// Additional bytes that must be freed.
    #[must_use]
    pub const fn additional(&self) -> u64 {
        self.required.saturating_sub(self.available)
    }
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.operation.headline())?;
        writeln!(
            f,
            "Required: {} ({} bytes)",
            format_bytes(self.required),
            group_thousands(self.required)
        )?;
        writeln!(
            f,
            "Available: {} ({} bytes)",
            format_bytes(self.available),
            group_thousands(self.available)
        )?;
        writeln!(
            f,
            "Additional space needed: {} ({} bytes)",
            format_bytes(self.additional()),
            group_thousands(self.additional())
        )?;
        write!(f, "Please free up some space and try again.")
    }
}

impl std::error::Error for Shortfall {}

/// Renders `bytes` with a binary unit, rounded to at most two decimals.
///
/// Trailing zeros are dropped, so 1536 bytes renders as `1.5 KB` and 2048 as
/// `2 KB`.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    let value = u128::from(bytes);
    let mut divisor: u128 = 1;
    let mut unit_index = 0_usize;
    while unit_index + 1 < UNITS.len() && value >= divisor.saturating_mul(1024) {
        divisor = divisor.saturating_mul(1024);
        unit_index += 1;
    }

    let rounding = divisor.checked_div(2).unwrap_or(0);
    let hundredths = value
        .saturating_mul(100)
        .saturating_add(rounding)
        .checked_div(divisor)
        .unwrap_or(0);
    let whole = hundredths.checked_div(100).unwrap_or(0);
    let fraction = hundredths.checked_rem(100).unwrap_or(0);
    let unit = UNITS.get(unit_index).copied().unwrap_or("B");

    if fraction == 0 {
        format!("{whole} {unit}")
    } else if fraction.checked_rem(10) == Some(0) {
        let tenths = fraction.checked_div(10).unwrap_or(0);
        format!("{whole}.{tenths} {unit}")
    } else {
        format!("{whole}.{fraction:02} {unit}")
    }
}

/// Formats `value` with comma thousands separators.
#[must_use]
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let len = digits.len();
    let mut grouped = String::with_capacity(len + len.checked_div(3).unwrap_or(0));
    for (index, digit) in digits.chars().enumerate() {
        let remaining = len - index;
        if index > 0 && remaining.checked_rem(3) == Some(0) {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}
