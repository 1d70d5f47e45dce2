//! Database dump, replay and size estimate, executed inside the site
//! container through the site manager.
//!
//! Credentials are shell-escaped into the container command line and never
//! appear in log output or error messages.

use std::borrow::Cow;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info};

use crate::fs_ops::{self, FsError};
use crate::process::{CommandRunner, ProcessError};
use crate::site::{DatabaseCredentials, SiteManager, SiteSnapshot};

/// Directory (below the working tree and below `app/`) holding dumps.
pub const SQL_DIR: &str = "sql";

/// Container directory shared with the host `app/htdocs`.
const CONTAINER_HTDOCS: &str = "/var/www/htdocs";

/// Container directory shared with the host `app/`.
const CONTAINER_APP: &str = "/var/www";

/// Errors raised by database operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DatabaseError {
    /// Raised when the dump or replay command fails.
    #[error("database {operation} failed for {site}: {source}")]
    Command {
        /// `dump`, `restore` or `size query`.
        operation: &'static str,
        /// Site whose database was targeted.
        site: String,
        /// Underlying process error; carries stderr, never the command.
        source: ProcessError,
    },
    /// Raised when the dump cannot be moved into the working tree.
    #[error(transparent)]
    Fs(#[from] FsError),
}

fn quote(value: &str) -> Cow<'_, str> {
    escape(value.into())
}

fn client_flags(credentials: &DatabaseCredentials) -> String {
    format!(
        "--skip-ssl -u {} -p{} -h {}",
        quote(&credentials.user),
        quote(&credentials.password),
        quote(&credentials.host)
    )
}

/// Runs `mysqldump` and `mysql` in the site container.
#[derive(Clone, Debug)]
pub struct DatabaseAdapter<R: CommandRunner> {
    manager: SiteManager<R>,
}

impl<R: CommandRunner> DatabaseAdapter<R> {
    /// Builds an adapter on top of the site manager.
    pub const fn new(manager: SiteManager<R>) -> Self {
        Self { manager }
    }

    /// Estimates the database size in bytes from `information_schema`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Command`] when the query cannot be run.
    pub fn estimate_size(
        &self,
        site: &SiteSnapshot,
        credentials: &DatabaseCredentials,
    ) -> Result<u64, DatabaseError> {
        let query = format!(
            "SELECT SUM(data_length + index_length) FROM information_schema.TABLES \
             WHERE table_schema = '{}'",
            credentials.name.replace('\'', "''")
        );
        let command = format!(
            "mysql {} -N -e {} {}",
            client_flags(credentials),
            quote(&query),
            quote(&credentials.name)
        );
        let output = self
            .manager
            .shell_checked(&site.url, &command)
            .map_err(|source| DatabaseError::Command {
                operation: "size query",
                site: site.url.clone(),
                source,
            })?;
        let size = parse_size(&output.stdout);
        debug!(site = %site.url, size, "database size estimated");
        Ok(size)
    }

    /// Dumps the database and moves the file to `<work_dir>/sql/<site>.sql`.
    ///
    /// Returns the `sql` directory so the caller can merge it into the
    /// archive.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the dump fails or cannot be moved.
    pub fn dump(
        &self,
        site: &SiteSnapshot,
        credentials: &DatabaseCredentials,
        work_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, DatabaseError> {
        info!(site = %site.url, "backing up database");
        let sql_name = site.sql_file_name();
        let sql_dir = work_dir.join(SQL_DIR);
        fs_ops::create_dir_all(&sql_dir)?;

        let command = format!(
            "mysqldump {} --single-transaction {} > {}",
            client_flags(credentials),
            quote(&credentials.name),
            quote(&format!("{CONTAINER_HTDOCS}/{sql_name}"))
        );
        self.manager
            .shell_checked(&site.url, &command)
            .map_err(|source| DatabaseError::Command {
                operation: "dump",
                site: site.url.clone(),
                source,
            })?;

        fs_ops::rename(&site.htdocs_dir().join(&sql_name), &sql_dir.join(&sql_name))?;
        Ok(sql_dir)
    }

    /// Replays `<app>/sql/<site>.sql` into the site database.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Command`] when the replay fails.
    pub fn restore(
        &self,
        site: &SiteSnapshot,
        credentials: &DatabaseCredentials,
    ) -> Result<(), DatabaseError> {
        info!(site = %site.url, "restoring database");
        let container_sql = format!("{CONTAINER_APP}/{SQL_DIR}/{}", site.sql_file_name());
        let command = format!(
            "mysql {} {} < {} 2>/dev/null",
            client_flags(credentials),
            quote(&credentials.name),
            quote(&container_sql)
        );
        self.manager
            .shell_checked(&site.url, &command)
            .map_err(|source| DatabaseError::Command {
                operation: "restore",
                site: site.url.clone(),
                source,
            })?;
        Ok(())
    }
}

fn parse_size(stdout: &str) -> u64 {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
