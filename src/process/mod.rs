//! External command execution behind a fakeable runner.
//!
//! Every tool the engine drives (archivers, database clients, `rclone`, the
//! site manager CLI) goes through [`CommandRunner`], so tests can script exit
//! codes and output without spawning processes.

use std::ffi::OsString;
use std::process::Command;

use camino::Utf8Path;
use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns `true` when the exit code is one of `accepted`.
    #[must_use]
    pub fn exited_with_any(&self, accepted: &[i32]) -> bool {
        self.code.is_some_and(|code| accepted.contains(&code))
    }

    /// Human readable exit status, `unknown` when the process was killed.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }

    /// Converts a non-zero exit into [`ProcessError::CommandFailure`].
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::CommandFailure`] when the exit code is not zero.
    pub fn require_success(self, program: &str) -> Result<Self, ProcessError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(self.into_failure(program))
    }

    /// Builds the failure error for this output without checking the code.
    #[must_use]
    pub fn into_failure(self, program: &str) -> ProcessError {
        ProcessError::CommandFailure {
            program: program.to_owned(),
            status: self.code,
            status_text: self.status_text(),
            stderr: self.stderr.trim().to_owned(),
        }
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments in the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        self.run_in(None, program, args)
    }

    /// Runs `program` with `dir` as its working directory when provided.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the command cannot be started.
    fn run_in(
        &self,
        dir: Option<&Utf8Path>,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ProcessError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run_in(
        &self,
        dir: Option<&Utf8Path>,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ProcessError> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(working_dir) = dir {
            command.current_dir(working_dir);
        }
        let output = command.output().map_err(|err| ProcessError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builds an argument vector from string slices.
#[must_use]
pub fn os_args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| OsString::from(item.as_ref()))
        .collect()
}

/// Errors surfaced while running external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

#[cfg(test)]
mod tests;
