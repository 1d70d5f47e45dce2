//! WP-CLI driven inventory and maintenance for WordPress sites.
//!
//! Inventory commands run under a hard `timeout` and never fail the backup:
//! an empty or failed answer becomes the `-` placeholder.

use std::borrow::Cow;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metadata::{ContentCounts, InventoryItem, MetaManifest, UNKNOWN_COUNT};
use crate::process::{CommandRunner, ProcessError};
use crate::site::{DatabaseCredentials, SiteManager, SiteSnapshot};

/// Wrapper bounding every inventory command.
const TIMEOUT_PREFIX: &str = "timeout -k 10 --preserve-status 120 wp";

/// Errors raised by WP-CLI maintenance commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WordPressError {
    /// Raised when a maintenance command fails.
    #[error("wp {operation} failed for {site}: {source}")]
    Command {
        /// Command that failed, without arguments.
        operation: &'static str,
        /// Site the command ran against.
        site: String,
        /// Underlying process error.
        source: ProcessError,
    },
}

/// Counts plus the manifest stored inside the archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WordPressInventory {
    /// Figures persisted in the backup metadata.
    pub counts: ContentCounts,
    /// Manifest merged into the archive as `meta.json`.
    pub manifest: MetaManifest,
}

/// Runs WP-CLI inside a site container.
#[derive(Clone, Debug)]
pub struct WpCli<R: CommandRunner> {
    manager: SiteManager<R>,
}

impl<R: CommandRunner> WpCli<R> {
    /// Builds a WP-CLI wrapper on top of the site manager.
    pub const fn new(manager: SiteManager<R>) -> Self {
        Self { manager }
    }

    /// Collects content counts and the plugin/theme inventory.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] when the site manager cannot be
    /// started; command failures only degrade individual figures.
    pub fn collect(&self, site: &SiteSnapshot) -> Result<WordPressInventory, ProcessError> {
        let post_count = self.query(site, "post list --format=count", true)?;
        let page_count = self.query(site, "post list --post_type=page --format=count", true)?;
        let comment_count = self.query(site, "comment list --format=count", true)?;
        let upload_count = self.upload_count(site)?;
        let plugin_count = numeric_or_unknown(self.query(site, "plugin list --format=count", false)?);
        let theme_count = numeric_or_unknown(self.query(site, "theme list --format=count", false)?);
        let user_count = self.query(site, "user list --format=count", true)?;
        let wp_version = self.query(site, "core version", true)?;

        let plugins = parse_inventory(&self.query(site, "plugin list --format=json", false)?, "plugin");
        let themes = parse_inventory(&self.query(site, "theme list --format=json", false)?, "theme");

        let manifest = MetaManifest {
            site_url: site.url.clone(),
            php_version: site.php_version.clone(),
            wordpress_version: wp_version.clone(),
            plugins,
            themes,
        };
        let counts = ContentCounts {
            post_count,
            page_count,
            comment_count,
            upload_count,
            plugin_count,
            theme_count,
            user_count,
            wp_version,
        };
        debug!(site = %site.url, ?counts, "wordpress inventory collected");
        Ok(WordPressInventory { counts, manifest })
    }

    /// Downloads WordPress core `version` over the existing install.
    ///
    /// # Errors
    ///
    /// Returns [`WordPressError::Command`] when the download fails.
    pub fn core_download(&self, site: &SiteSnapshot, version: &str) -> Result<(), WordPressError> {
        let command = format!("wp core download --force --version={}", quote(version));
        self.checked(site, "core download", &command)
    }

    /// Points `wp-config.php` at the site's current database.
    ///
    /// # Errors
    ///
    /// Returns [`WordPressError::Command`] when a setting cannot be written.
    pub fn configure_database(
        &self,
        site: &SiteSnapshot,
        credentials: &DatabaseCredentials,
    ) -> Result<(), WordPressError> {
        let settings = [
            ("DB_NAME", &credentials.name),
            ("DB_USER", &credentials.user),
            ("DB_PASSWORD", &credentials.password),
            ("DB_HOST", &credentials.host),
        ];
        for (key, value) in settings {
            let command = format!("wp config set {key} {}", quote(value));
            self.checked(site, "config set", &command)?;
        }
        Ok(())
    }

    /// Flushes the object cache. Failures are logged and ignored.
    pub fn cache_flush(&self, site: &SiteSnapshot) {
        match self
            .manager
            .shell_checked(&site.url, "wp cache flush --skip-plugins --skip-themes")
        {
            Ok(_) => debug!(site = %site.url, "object cache flushed"),
            Err(err) => warn!(site = %site.url, error = %err, "failed to flush the object cache"),
        }
    }

    fn checked(
        &self,
        site: &SiteSnapshot,
        operation: &'static str,
        command: &str,
    ) -> Result<(), WordPressError> {
        self.manager
            .shell_checked(&site.url, command)
            .map(|_| ())
            .map_err(|source| WordPressError::Command {
                operation,
                site: site.url.clone(),
                source,
            })
    }

    fn query(
        &self,
        site: &SiteSnapshot,
        command: &str,
        skip_extensions: bool,
    ) -> Result<String, ProcessError> {
        let line = if skip_extensions {
            format!("{TIMEOUT_PREFIX} --skip-plugins --skip-themes {command}")
        } else {
            format!("{TIMEOUT_PREFIX} {command}")
        };
        let output = self.manager.shell(&site.url, &line)?;
        let trimmed = output.stdout.trim();
        if trimmed.is_empty() {
            Ok(UNKNOWN_COUNT.to_owned())
        } else {
            Ok(trimmed.to_owned())
        }
    }

    fn upload_count(&self, site: &SiteSnapshot) -> Result<String, ProcessError> {
        let prefix = self.query(site, "config get table_prefix", true)?;
        if !is_table_prefix(&prefix) {
            warn!(site = %site.url, "unexpected table prefix, skipping upload count");
            return Ok(UNKNOWN_COUNT.to_owned());
        }
        let sql = format!("SELECT COUNT(*) FROM {prefix}posts WHERE post_type=\"attachment\"");
        let command = format!("db query {} --skip-column-names", quote(&sql));
        self.query(site, &command, true)
    }
}

fn quote(value: &str) -> Cow<'_, str> {
    escape(value.into())
}

fn is_table_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix != UNKNOWN_COUNT
        && prefix
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn numeric_or_unknown(value: String) -> String {
    if value.parse::<u64>().is_ok() {
        value
    } else {
        UNKNOWN_COUNT.to_owned()
    }
}

fn parse_inventory(raw: &str, kind: &str) -> Vec<InventoryItem> {
    if raw == UNKNOWN_COUNT {
        return Vec::new();
    }
    serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!(error = %err, "failed to read the {kind} list");
        Vec::new()
    })
}
