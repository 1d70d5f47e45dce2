//! Site model supplied by the site manager, plus the host layout derived
//! from it.
//!
//! A [`SiteSnapshot`] is read once at the start of an operation and never
//! mutated by the engine.

use std::fmt;

use camino::Utf8PathBuf;

mod manager;

pub use manager::{SiteDirectory, SiteLookupError, SiteManager};

/// Container path every site's web content lives below.
pub const CONTAINER_WWW_ROOT: &str = "/var/www/";

/// Default container content path for new sites.
pub const DEFAULT_CONTAINER_FS_PATH: &str = "/var/www/htdocs";

/// Credentials for a site's database.
#[derive(Clone, Eq, PartialEq)]
pub struct DatabaseCredentials {
    /// Database (schema) name.
    pub name: String,
    /// Database user.
    pub user: String,
    /// Database password. Never logged.
    pub password: String,
    /// Database host as seen from inside the site container.
    pub host: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

/// Site type with the payload each variant needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SiteKind {
    /// Static site; the web root is archived verbatim.
    Html,
    /// PHP application with an optional database.
    Php {
        /// Database credentials, when the site has a database.
        database: Option<DatabaseCredentials>,
    },
    /// WordPress site with an optional database.
    WordPress {
        /// Database credentials, when the site has a database.
        database: Option<DatabaseCredentials>,
    },
}

impl SiteKind {
    /// Short type tag persisted in metadata (`html`, `php`, `wp`).
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Php { .. } => "php",
            Self::WordPress { .. } => "wp",
        }
    }

    /// Database credentials, if the kind carries any.
    #[must_use]
    pub const fn database(&self) -> Option<&DatabaseCredentials> {
        match self {
            Self::Html => None,
            Self::Php { database } | Self::WordPress { database } => database.as_ref(),
        }
    }
}

/// Immutable view of a site at operation start.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SiteSnapshot {
    /// Site URL, also used as the directory and archive name.
    pub url: String,
    /// Type and database payload.
    pub kind: SiteKind,
    /// Host directory holding the site's `app/` and `config/` trees.
    pub fs_root: Utf8PathBuf,
    /// Content path inside the container, for example `/var/www/htdocs`.
    pub container_fs_path: String,
    /// PHP version reported by the site manager.
    pub php_version: Option<String>,
}

impl SiteSnapshot {
    /// Host `app/` directory mounted at `/var/www` in the container.
    #[must_use]
    pub fn app_dir(&self) -> Utf8PathBuf {
        self.fs_root.join("app")
    }

    /// Host `app/htdocs` directory.
    #[must_use]
    pub fn htdocs_dir(&self) -> Utf8PathBuf {
        self.app_dir().join("htdocs")
    }

    /// Host `config/` directory holding nginx and php settings.
    #[must_use]
    pub fn config_dir(&self) -> Utf8PathBuf {
        self.fs_root.join("config")
    }

    /// Content path relative to `/var/www/`, without surrounding slashes.
    #[must_use]
    pub fn content_relative(&self) -> &str {
        let path = self.container_fs_path.trim_end_matches('/');
        path.strip_prefix(CONTAINER_WWW_ROOT)
            .unwrap_or(path)
            .trim_start_matches('/')
    }

    /// Host directory matching the container content path.
    #[must_use]
    pub fn content_dir(&self) -> Utf8PathBuf {
        let relative = self.content_relative();
        if relative.is_empty() {
            self.app_dir()
        } else {
            self.app_dir().join(relative)
        }
    }

    /// Path below `htdocs` that `wp-cli.yml` must point at, when the
    /// content lives somewhere other than `htdocs` itself.
    #[must_use]
    pub fn wp_cli_subpath(&self) -> Option<String> {
        let relative = self.content_relative();
        let trimmed = relative
            .strip_prefix("htdocs")
            .unwrap_or(relative)
            .trim_matches('/');
        (!trimmed.is_empty()).then(|| format!("{trimmed}/"))
    }

    /// Compose override file kept next to the site tree.
    #[must_use]
    pub fn custom_compose_file(&self) -> Utf8PathBuf {
        self.fs_root.join(CUSTOM_COMPOSE_FILE)
    }

    /// Directory of user-supplied compose fragments.
    #[must_use]
    pub fn custom_compose_dir(&self) -> Utf8PathBuf {
        self.fs_root.join(CUSTOM_COMPOSE_DIR)
    }

    /// File name of the primary archive.
    #[must_use]
    pub fn archive_name(&self) -> String {
        format!("{}.zip", self.url)
    }

    /// File name of the database dump.
    #[must_use]
    pub fn sql_file_name(&self) -> String {
        format!("{}.sql", self.url)
    }

    /// Returns `true` when the site has database credentials.
    #[must_use]
    pub const fn has_database(&self) -> bool {
        self.kind.database().is_some()
    }
}

/// Name of the compose override file.
pub const CUSTOM_COMPOSE_FILE: &str = "docker-compose-custom.yml";

/// Name of the user compose directory.
pub const CUSTOM_COMPOSE_DIR: &str = "user-docker-compose";
