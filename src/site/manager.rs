//! Site manager (`ee`) integration: site lookup, in-container shell
//! commands, reload and re-enable.

use camino::Utf8PathBuf;
use serde::Deserialize;
use thiserror::Error;

use super::{DEFAULT_CONTAINER_FS_PATH, DatabaseCredentials, SiteKind, SiteSnapshot};
use crate::process::{CommandOutput, CommandRunner, ProcessError, os_args};

/// Errors raised while resolving a site.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SiteLookupError {
    /// Raised when the site manager cannot be run or rejects the site.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when the site manager's output cannot be parsed.
    #[error("failed to parse site info for {site}: {message}")]
    Parse {
        /// Site that was looked up.
        site: String,
        /// Parser error message.
        message: String,
    },
    /// Raised for site types the engine does not back up.
    #[error("Backup is not supported for site type '{site_type}'.")]
    UnsupportedType {
        /// Type reported by the site manager.
        site_type: String,
    },
}

/// Resolves a site name into a [`SiteSnapshot`].
pub trait SiteDirectory {
    /// Looks up `site`.
    ///
    /// # Errors
    ///
    /// Returns [`SiteLookupError`] when the site is unknown or unsupported.
    fn lookup(&self, site: &str) -> Result<SiteSnapshot, SiteLookupError>;
}

/// Thin wrapper over the `ee` CLI.
#[derive(Clone, Debug)]
pub struct SiteManager<R: CommandRunner> {
    runner: R,
    ee_bin: String,
    sites_root: Option<Utf8PathBuf>,
}

impl<R: CommandRunner> SiteManager<R> {
    /// Builds a manager invoking `ee_bin`.
    pub fn new(runner: R, ee_bin: impl Into<String>) -> Self {
        Self {
            runner,
            ee_bin: ee_bin.into(),
            sites_root: None,
        }
    }

    /// Resolves sites whose info omits `site_fs_path` to
    /// `<sites_root>/<site>`.
    #[must_use]
    pub fn with_sites_root(mut self, sites_root: impl Into<Utf8PathBuf>) -> Self {
        self.sites_root = Some(sites_root.into());
        self
    }

    /// Runs `command` inside the site container without a TTY.
    ///
    /// The command string is handed to the container shell unchanged, so
    /// callers must escape any interpolated values. The exit status is
    /// returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] when `ee` cannot be started.
    pub fn shell(&self, site: &str, command: &str) -> Result<CommandOutput, ProcessError> {
        let command_arg = format!("--command={command}");
        let args = os_args(["shell", site, "--skip-tty", command_arg.as_str()]);
        self.runner.run(&self.ee_bin, &args)
    }

    /// Like [`SiteManager::shell`] but fails on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::CommandFailure`] when the command fails.
    pub fn shell_checked(&self, site: &str, command: &str) -> Result<CommandOutput, ProcessError> {
        self.shell(site, command)?.require_success(&self.ee_bin)
    }

    /// Reloads the site's services.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the reload fails.
    pub fn reload(&self, site: &str) -> Result<(), ProcessError> {
        self.runner
            .run(&self.ee_bin, &os_args(["site", "reload", site]))?
            .require_success(&self.ee_bin)
            .map(|_| ())
    }

    /// Re-enables the site so compose overrides take effect.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when enabling fails.
    pub fn enable(&self, site: &str) -> Result<(), ProcessError> {
        self.runner
            .run(&self.ee_bin, &os_args(["site", "enable", site, "--force"]))?
            .require_success(&self.ee_bin)
            .map(|_| ())
    }
}

impl<R: CommandRunner> SiteDirectory for SiteManager<R> {
    fn lookup(&self, site: &str) -> Result<SiteSnapshot, SiteLookupError> {
        let output = self
            .runner
            .run(&self.ee_bin, &os_args(["site", "info", site, "--format=json"]))?
            .require_success(&self.ee_bin)?;
        let record: SiteRecord =
            serde_json::from_str(&output.stdout).map_err(|err| SiteLookupError::Parse {
                site: site.to_owned(),
                message: err.to_string(),
            })?;
        let fallback_root = self.sites_root.as_ref().map(|root| root.join(site));
        record.into_snapshot(fallback_root)
    }
}

#[derive(Debug, Deserialize)]
struct SiteRecord {
    site_url: String,
    site_type: String,
    #[serde(default)]
    site_fs_path: Option<String>,
    #[serde(default)]
    site_container_fs_path: Option<String>,
    #[serde(default)]
    db_name: Option<String>,
    #[serde(default)]
    db_user: Option<String>,
    #[serde(default)]
    db_password: Option<String>,
    #[serde(default)]
    db_host: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    php_version: Option<String>,
}

impl SiteRecord {
    fn into_snapshot(
        self,
        fallback_root: Option<Utf8PathBuf>,
    ) -> Result<SiteSnapshot, SiteLookupError> {
        let Some(fs_root) = non_empty(self.site_fs_path)
            .map(Utf8PathBuf::from)
            .or(fallback_root)
        else {
            return Err(SiteLookupError::Parse {
                site: self.site_url,
                message: String::from("site_fs_path is missing"),
            });
        };
        let database = non_empty(self.db_name).map(|name| DatabaseCredentials {
            name,
            user: self.db_user.unwrap_or_default(),
            password: self.db_password.unwrap_or_default(),
            host: self.db_host.unwrap_or_default(),
        });
        let kind = match self.site_type.as_str() {
            "html" => SiteKind::Html,
            "php" => SiteKind::Php { database },
            "wp" => SiteKind::WordPress { database },
            _ => {
                return Err(SiteLookupError::UnsupportedType {
                    site_type: self.site_type,
                });
            }
        };
        Ok(SiteSnapshot {
            url: self.site_url,
            kind,
            fs_root,
            container_fs_path: non_empty(self.site_container_fs_path)
                .unwrap_or_else(|| String::from(DEFAULT_CONTAINER_FS_PATH)),
            php_version: non_empty(self.php_version),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}
