//! Capability-scoped file system helpers.
//!
//! Paths handed to the engine are absolute UTF-8 paths. Each helper opens the
//! parent directory through `cap-std` and operates on the final component, so
//! a helper never touches anything outside the directory it was pointed at.

use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::{OpenOptions, Permissions};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised by file system helpers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FsError {
    /// Raised when a file system operation fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a path has no final component to operate on.
    #[error("path {path} has no file name")]
    NoFileName {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Raised when creating a file that must not already exist.
    #[error("{path} already exists")]
    AlreadyExists {
        /// Path that was already present.
        path: Utf8PathBuf,
    },
}

fn io_error(path: &Utf8Path, err: &io::Error) -> FsError {
    FsError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), FsError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| FsError::NoFileName {
        path: path.to_path_buf(),
    })?;
    Ok((parent, file_name))
}

fn open_dir(path: &Utf8Path) -> Result<Dir, FsError> {
    Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

/// Opens the parent of `path`, returning `None` when the parent is absent.
fn open_parent(path: &Utf8Path) -> Result<Option<(Dir, &str)>, FsError> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => Ok(Some((dir, file_name))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(parent, &err)),
    }
}

fn open_existing_parent(path: &Utf8Path) -> Result<(Dir, &str), FsError> {
    let (parent, file_name) = split(path)?;
    Ok((open_dir(parent)?, file_name))
}

/// Returns whether an entry named by `path` is present.
///
/// The final component is not followed: a symbolic link counts as present
/// wherever it points, including mounts outside the parent directory.
///
/// # Errors
///
/// Returns [`FsError::Io`] when the parent directory cannot be inspected.
pub fn exists(path: &Utf8Path) -> Result<bool, FsError> {
    let Some((dir, name)) = open_parent(path)? else {
        return Ok(false);
    };
    match dir.symlink_metadata(name) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error(path, &err)),
    }
}

/// Returns whether `path` is itself a symbolic link.
///
/// # Errors
///
/// Returns [`FsError::Io`] when metadata cannot be read for a reason other
/// than the path being absent.
pub fn is_symlink(path: &Utf8Path) -> Result<bool, FsError> {
    let Some((dir, name)) = open_parent(path)? else {
        return Ok(false);
    };
    match dir.symlink_metadata(name) {
        Ok(meta) => Ok(meta.file_type().is_symlink()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error(path, &err)),
    }
}

/// Creates `path` and any missing ancestors.
///
/// # Errors
///
/// Returns [`FsError::Io`] when a directory cannot be created.
pub fn create_dir_all(path: &Utf8Path) -> Result<(), FsError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

/// Reads the file at `path` into a string.
///
/// # Errors
///
/// Returns [`FsError::Io`] when the file cannot be read.
pub fn read_to_string(path: &Utf8Path) -> Result<String, FsError> {
    let (dir, name) = open_existing_parent(path)?;
    dir.read_to_string(name).map_err(|err| io_error(path, &err))
}

/// Writes `contents` to `path`, creating parent directories when needed.
///
/// # Errors
///
/// Returns [`FsError::Io`] when the parent cannot be created or the write
/// fails.
pub fn write(path: &Utf8Path, contents: &str) -> Result<(), FsError> {
    let (parent, name) = split(path)?;
    create_dir_all(parent)?;
    let dir = open_dir(parent)?;
    dir.write(name, contents).map_err(|err| io_error(path, &err))
}

/// Creates `path` exclusively and writes `contents` to it.
///
/// # Errors
///
/// Returns [`FsError::AlreadyExists`] when the file is already present, or
/// [`FsError::Io`] for any other failure.
pub fn create_new(path: &Utf8Path, contents: &str) -> Result<(), FsError> {
    let (parent, name) = split(path)?;
    create_dir_all(parent)?;
    let dir = open_dir(parent)?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    let mut file = dir.open_with(name, &options).map_err(|err| {
        if err.kind() == io::ErrorKind::AlreadyExists {
            FsError::AlreadyExists {
                path: path.to_path_buf(),
            }
        } else {
            io_error(path, &err)
        }
    })?;
    file.write_all(contents.as_bytes())
        .map_err(|err| io_error(path, &err))
}

/// Copies the file at `from` to `to`, replacing any existing file.
///
/// # Errors
///
/// Returns [`FsError::Io`] when either side cannot be accessed.
pub fn copy(from: &Utf8Path, to: &Utf8Path) -> Result<(), FsError> {
    let (from_dir, from_name) = open_existing_parent(from)?;
    let (to_parent, to_name) = split(to)?;
    create_dir_all(to_parent)?;
    let to_dir = open_dir(to_parent)?;
    from_dir
        .copy(from_name, &to_dir, to_name)
        .map(|_| ())
        .map_err(|err| io_error(from, &err))
}

/// Moves `from` to `to`, falling back to copy-and-delete for files that live
/// on different devices.
///
/// # Errors
///
/// Returns [`FsError::Io`] when the move cannot be completed.
pub fn rename(from: &Utf8Path, to: &Utf8Path) -> Result<(), FsError> {
    let (from_dir, from_name) = open_existing_parent(from)?;
    let (to_parent, to_name) = split(to)?;
    create_dir_all(to_parent)?;
    let to_dir = open_dir(to_parent)?;
    match from_dir.rename(from_name, &to_dir, to_name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            copy(from, to)?;
            remove_file_if_exists(from)
        }
        Err(err) => Err(io_error(from, &err)),
    }
}

/// Removes the file or symlink at `path` when present.
///
/// # Errors
///
/// Returns [`FsError::Io`] when removal fails for a reason other than the
/// path being absent.
pub fn remove_file_if_exists(path: &Utf8Path) -> Result<(), FsError> {
    let Some((dir, name)) = open_parent(path)? else {
        return Ok(());
    };
    match dir.remove_file(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(path, &err)),
    }
}

/// Removes the directory tree at `path` when present.
///
/// # Errors
///
/// Returns [`FsError::Io`] when removal fails for a reason other than the
/// path being absent.
pub fn remove_dir_all_if_exists(path: &Utf8Path) -> Result<(), FsError> {
    let Some((dir, name)) = open_parent(path)? else {
        return Ok(());
    };
    match dir.remove_dir_all(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(path, &err)),
    }
}

/// Removes every entry inside `path` while keeping the directory itself.
///
/// Symlinks are removed without following them.
///
/// # Errors
///
/// Returns [`FsError::Io`] when the directory cannot be listed or an entry
/// cannot be removed.
pub fn clear_dir(path: &Utf8Path) -> Result<(), FsError> {
    let dir = open_dir(path)?;
    let entries = dir.entries().map_err(|err| io_error(path, &err))?;
    for item in entries {
        let entry = item.map_err(|err| io_error(path, &err))?;
        let name = entry.file_name().map_err(|err| io_error(path, &err))?;
        let file_type = entry.file_type().map_err(|err| io_error(path, &err))?;
        let removal = if file_type.is_dir() {
            dir.remove_dir_all(&name)
        } else {
            dir.remove_file(&name)
        };
        removal.map_err(|err| io_error(&path.join(&name), &err))?;
    }
    Ok(())
}

/// Sets unix permission bits on `path`.
///
/// # Errors
///
/// Returns [`FsError::Io`] when the permissions cannot be changed.
pub fn set_mode(path: &Utf8Path, mode: u32) -> Result<(), FsError> {
    let (dir, name) = open_existing_parent(path)?;
    let permissions = Permissions::from_std(std::fs::Permissions::from_mode(mode));
    dir.set_permissions(name, permissions)
        .map_err(|err| io_error(path, &err))
}
