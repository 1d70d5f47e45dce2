//! Tool availability checks run before any backup or restore work.
//!
//! Missing archive tools are installed with `apt-get` when the host has it;
//! otherwise the run stops with an install hint.

use std::borrow::Cow;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::ArchiveBinaries;
use crate::process::{CommandRunner, ProcessError, os_args};
use crate::remote::{RemoteError, RemoteStore};

/// Errors raised by preflight checks.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PreflightError {
    /// Raised when `rclone` is not usable.
    #[error(
        "rclone is not installed. Please install rclone for backup/restore: \
         https://rclone.org/downloads/#script-download-and-install"
    )]
    RcloneMissing {
        /// Underlying remote error.
        source: RemoteError,
    },
    /// Raised when the configured remote is not defined in rclone.
    #[error("rclone remote {remote} does not exist. Please create it using `rclone config`")]
    RemoteMissing {
        /// Remote name, including the trailing `:`.
        remote: String,
    },
    /// Raised when a required tool is absent and cannot be installed.
    #[error("{package} is not installed. Please install {package} for backup/restore.{hint}")]
    ToolMissing {
        /// Package providing the tool.
        package: String,
        /// Platform-specific install hint, possibly empty.
        hint: String,
    },
    /// Raised when a check command cannot be started.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when listing remotes fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Host family, which decides how missing tools are handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostPlatform {
    /// macOS: tools are never installed automatically.
    MacOs,
    /// Anything else: `apt-get` is used when present.
    Other,
}

impl HostPlatform {
    /// Platform of the running binary.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }
}

/// A command that must be on `PATH`, and the package providing it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequiredTool {
    /// Command looked up with `command -v`.
    pub command: String,
    /// Package to install when it is missing.
    pub package: &'static str,
}

/// Checks `rclone`, the configured remote and the archive tools.
#[derive(Clone, Debug)]
pub struct Preflight<R: CommandRunner> {
    runner: R,
    platform: HostPlatform,
    tools: Vec<RequiredTool>,
}

impl<R: CommandRunner> Preflight<R> {
    /// Builds the checks for the configured archive binaries.
    pub fn new(runner: R, platform: HostPlatform, binaries: &ArchiveBinaries) -> Self {
        let tools = vec![
            RequiredTool {
                command: String::from("zip"),
                package: "zip",
            },
            RequiredTool {
                command: binaries.seven_zip.clone(),
                package: "p7zip-full",
            },
            RequiredTool {
                command: binaries.unzip.clone(),
                package: "unzip",
            },
            RequiredTool {
                command: binaries.rsync.clone(),
                package: "rsync",
            },
        ];
        Self {
            runner,
            platform,
            tools,
        }
    }

    /// Runs every check.
    ///
    /// # Errors
    ///
    /// Returns [`PreflightError`] naming the first missing prerequisite.
    pub fn run<S: CommandRunner>(&self, store: &RemoteStore<S>) -> Result<(), PreflightError> {
        self.check_remote(store)?;
        for tool in &self.tools {
            self.ensure_tool(tool)?;
        }
        Ok(())
    }

    /// Verifies `rclone` runs and knows the configured remote.
    ///
    /// # Errors
    ///
    /// Returns [`PreflightError::RcloneMissing`] or
    /// [`PreflightError::RemoteMissing`].
    pub fn check_remote<S: CommandRunner>(
        &self,
        store: &RemoteStore<S>,
    ) -> Result<(), PreflightError> {
        let version = store
            .version()
            .map_err(|source| PreflightError::RcloneMissing { source })?;
        debug!(%version, "rclone found");
        let wanted = format!("{}:", store.remote_name());
        if store.remotes()?.iter().any(|remote| *remote == wanted) {
            Ok(())
        } else {
            Err(PreflightError::RemoteMissing { remote: wanted })
        }
    }

    fn ensure_tool(&self, tool: &RequiredTool) -> Result<(), PreflightError> {
        if self.tool_present(&tool.command)? {
            return Ok(());
        }
        let missing = || PreflightError::ToolMissing {
            package: tool.package.to_owned(),
            hint: match self.platform {
                HostPlatform::MacOs => format!(
                    " You can install it using `brew install {}`.",
                    tool.package
                ),
                HostPlatform::Other => String::new(),
            },
        };
        if self.platform == HostPlatform::MacOs || !self.succeeds("apt-get", &["--version"])? {
            return Err(missing());
        }

        info!(package = tool.package, "installing missing package");
        if !self.succeeds("apt-get", &["update"])? {
            warn!("apt-get update failed, trying the install anyway");
        }
        if !self.succeeds("apt-get", &["install", "-y", tool.package])? {
            return Err(missing());
        }
        if self.tool_present(&tool.command)? {
            Ok(())
        } else {
            Err(missing())
        }
    }

    fn tool_present(&self, command: &str) -> Result<bool, PreflightError> {
        let probe = format!("command -v {}", quote(command));
        self.succeeds("sh", &["-c", probe.as_str()])
    }

    fn succeeds(&self, program: &str, args: &[&str]) -> Result<bool, PreflightError> {
        Ok(self.runner.run(program, &os_args(args))?.is_success())
    }
}

fn quote(value: &str) -> Cow<'_, str> {
    escape(value.into())
}
