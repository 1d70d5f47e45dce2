//! Command-line interface definitions for the `site-backup` binary.
//!
//! The parser lives here so the binary and the build script share it when
//! rendering the manual page.

use clap::Parser;

/// Top-level CLI for the `site-backup` binary.
#[derive(Debug, Parser)]
#[command(
    name = "site-backup",
    about = "Back up and restore hosted sites to an rclone remote",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Take a backup of a site, or list its remote generations.
    #[command(name = "backup", about = "Back up a site to remote storage")]
    Backup(BackupCommand),
    /// Restore a site from a remote generation.
    #[command(name = "restore", about = "Restore a site from remote storage")]
    Restore(RestoreCommand),
}

/// Arguments for the `site-backup backup` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BackupCommand {
    /// Site to back up.
    #[arg(value_name = "SITE")]
    pub(crate) site: String,
    /// List remote generations, most recent first, instead of backing up.
    #[arg(long, conflicts_with = "dash_auth")]
    pub(crate) list: bool,
    /// Report the outcome to the dashboard as `backup-id:verification-token`.
    ///
    /// Requires `ed_api_url` in configuration. The token is never logged.
    #[arg(long, value_name = "ID:TOKEN")]
    pub(crate) dash_auth: Option<String>,
}

/// Arguments for the `site-backup restore` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RestoreCommand {
    /// Site to restore.
    #[arg(value_name = "SITE")]
    pub(crate) site: String,
    /// Generation to restore; defaults to the most recent.
    #[arg(long, value_name = "ID")]
    pub(crate) id: Option<String>,
}
