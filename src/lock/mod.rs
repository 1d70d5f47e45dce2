//! Per-site mutual exclusion through a marker file under the backup root.
//!
//! A lock is a plain file named `<site>.lock`. It is created with
//! create-new semantics so two racing invocations cannot both win, and it is
//! only ever removed explicitly: a crashed run leaves the marker behind for
//! an operator to clear.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fs_ops::{self, FsError};

const LOCK_CONTENTS: &str = "lock";

/// Errors raised while acquiring or releasing a site lock.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LockError {
    /// Raised when another operation already holds the lock.
    #[error(
        "another backup or restore is already running for {site}; \
         remove {path} if no operation is in progress"
    )]
    Held {
        /// Site whose lock is held.
        site: String,
        /// Location of the existing marker.
        path: Utf8PathBuf,
    },
    /// Raised when the marker cannot be created or removed.
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Creates and removes per-site lock markers below a root directory.
#[derive(Clone, Debug)]
pub struct LockManager {
    root: Utf8PathBuf,
}

impl LockManager {
    /// Builds a manager storing markers in `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of the marker for `site`.
    #[must_use]
    pub fn lock_path(&self, site: &str) -> Utf8PathBuf {
        self.root.join(format!("{site}.lock"))
    }

    /// Takes the lock for `site`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] when the marker already exists, or
    /// [`LockError::Fs`] when it cannot be written.
    pub fn acquire(&self, site: &str) -> Result<SiteLock, LockError> {
        let path = self.lock_path(site);
        match fs_ops::create_new(&path, LOCK_CONTENTS) {
            Ok(()) => {
                debug!(%path, "lock acquired");
                Ok(SiteLock {
                    site: site.to_owned(),
                    path,
                })
            }
            Err(FsError::AlreadyExists { .. }) => Err(LockError::Held {
                site: site.to_owned(),
                path,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the marker for `site`. Succeeds when it is already gone.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Fs`] when the marker exists but cannot be removed.
    pub fn release(&self, site: &str) -> Result<(), LockError> {
        release_path(&self.lock_path(site))
    }
}

fn release_path(path: &Utf8Path) -> Result<(), LockError> {
    fs_ops::remove_file_if_exists(path)?;
    debug!(%path, "lock released");
    Ok(())
}

/// Proof that a site lock was acquired.
///
/// Dropping the value does not release the lock; callers release it on
/// every controlled exit path.
#[derive(Debug)]
#[must_use = "a held lock must be released explicitly"]
pub struct SiteLock {
    site: String,
    path: Utf8PathBuf,
}

impl SiteLock {
    /// Site the lock belongs to.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Marker location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Removes the marker. Calling this more than once is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Fs`] when the marker cannot be removed.
    pub fn release(&self) -> Result<(), LockError> {
        release_path(&self.path)
    }

    /// Removes the marker, logging a failure instead of returning it.
    pub fn release_logged(&self) {
        if let Err(err) = self.release() {
            warn!(site = %self.site, path = %self.path, error = %err, "failed to remove lock file");
        }
    }
}
