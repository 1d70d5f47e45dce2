//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::BackupConfig;
use crate::dash::{CallbackTransport, HttpReply, TransportError, TransportFuture};
use crate::disk::{DiskError, SpaceProbe};
use crate::fs_ops;
use crate::process::{CommandOutput, CommandRunner, ProcessError};

/// Scripted command runner.
///
/// Responses come from, in order: the first rule whose fragment appears in
/// the rendered command line, the FIFO queue, and finally the fallback when
/// [`ScriptedRunner::succeed_by_default`] was called. Without a match the
/// runner reports a spawn failure.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    rules: Rc<RefCell<Vec<(String, CommandOutput)>>>,
    fallback: Rc<RefCell<Option<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
    file_effects: Rc<RefCell<Vec<FileEffect>>>,
}

#[derive(Clone, Debug)]
struct FileEffect {
    fragment: String,
    path: Utf8PathBuf,
    contents: String,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Working directory, when one was requested.
    pub dir: Option<Utf8PathBuf>,
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

fn output(code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Rendered command lines of all invocations so far.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.responses
            .borrow_mut()
            .push_back(output(Some(0), "", ""));
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.responses
            .borrow_mut()
            .push_back(output(Some(code), "", ""));
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.responses
            .borrow_mut()
            .push_back(output(Some(code), "", "simulated failure"));
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .borrow_mut()
            .push_back(output(code, stdout, stderr));
    }

    /// Answers every command containing `fragment` with the given output.
    ///
    /// Rules are checked in registration order before the FIFO queue.
    pub fn on(
        &self,
        fragment: impl Into<String>,
        code: i32,
        stdout: impl Into<String>,
    ) {
        let stderr = if code == 0 { "" } else { "simulated failure" };
        self.rules
            .borrow_mut()
            .push((fragment.into(), output(Some(code), stdout, stderr)));
    }

    /// Makes unmatched commands succeed with empty output.
    pub fn succeed_by_default(&self) {
        *self.fallback.borrow_mut() = Some(output(Some(0), "", ""));
    }

    /// Writes `contents` to `path` whenever a command containing `fragment`
    /// runs, standing in for files the real tool would produce.
    pub fn creates_file_on(
        &self,
        fragment: impl Into<String>,
        path: impl Into<Utf8PathBuf>,
        contents: impl Into<String>,
    ) {
        self.file_effects.borrow_mut().push(FileEffect {
            fragment: fragment.into(),
            path: path.into(),
            contents: contents.into(),
        });
    }

    fn apply_file_effects(&self, program: &str, rendered: &str) -> Result<(), ProcessError> {
        let effects: Vec<FileEffect> = self
            .file_effects
            .borrow()
            .iter()
            .filter(|effect| rendered.contains(effect.fragment.as_str()))
            .cloned()
            .collect();
        for effect in effects {
            fs_ops::write(&effect.path, &effect.contents).map_err(|err| ProcessError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;
        }
        Ok(())
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_in(
        &self,
        dir: Option<&Utf8Path>,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ProcessError> {
        let invocation = CommandInvocation {
            dir: dir.map(Utf8Path::to_path_buf),
            program: program.to_owned(),
            args: args.to_vec(),
        };
        let rendered = invocation.command_string();
        self.invocations.borrow_mut().push(invocation);
        self.apply_file_effects(program, &rendered)?;

        let ruled = self
            .rules
            .borrow()
            .iter()
            .find(|(fragment, _)| rendered.contains(fragment.as_str()))
            .map(|(_, response)| response.clone());
        if let Some(response) = ruled {
            return Ok(response);
        }
        if let Some(response) = self.responses.borrow_mut().pop_front() {
            return Ok(response);
        }
        self.fallback
            .borrow()
            .clone()
            .ok_or_else(|| ProcessError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// A request captured by [`ScriptedTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    /// Endpoint the payload was posted to.
    pub url: String,
    /// JSON body.
    pub body: serde_json::Value,
}

#[derive(Debug, Default)]
struct TransportState {
    replies: VecDeque<Result<HttpReply, TransportError>>,
    repeat: Option<Result<HttpReply, TransportError>>,
    requests: Vec<RecordedRequest>,
}

/// Callback transport returning scripted replies.
///
/// Replies are consumed in FIFO order; once the queue is empty the reply set
/// with [`ScriptedTransport::always`] repeats, otherwise a connection error
/// is returned.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    /// Creates a transport with no scripted replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TransportState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Queues an HTTP reply with `status`.
    pub fn push_status(&self, status: u16) {
        self.with_state(|state| {
            state.replies.push_back(Ok(HttpReply {
                status,
                body: String::new(),
            }));
        });
    }

    /// Queues a connection failure.
    pub fn push_connection_error(&self) {
        self.with_state(|state| {
            state.replies.push_back(Err(TransportError::Connection(String::from(
                "simulated connection failure",
            ))));
        });
    }

    /// Answers every request with `status` once the queue is drained.
    pub fn always(&self, status: u16) {
        self.with_state(|state| {
            state.repeat = Some(Ok(HttpReply {
                status,
                body: String::new(),
            }));
        });
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with_state(|state| state.requests.clone())
    }
}

impl CallbackTransport for ScriptedTransport {
    fn post_json<'a>(&'a self, url: &'a str, body: &'a serde_json::Value) -> TransportFuture<'a> {
        let reply = self.with_state(|state| {
            state.requests.push(RecordedRequest {
                url: url.to_owned(),
                body: body.clone(),
            });
            state
                .replies
                .pop_front()
                .or_else(|| state.repeat.clone())
                .unwrap_or_else(|| {
                    Err(TransportError::Connection(String::from(
                        "no scripted reply available",
                    )))
                })
        });
        Box::pin(async move { reply })
    }
}

/// [`SpaceProbe`] reporting fixed figures.
#[derive(Clone, Copy, Debug)]
pub struct FixedSpace {
    /// Size reported for every directory.
    pub directory_size: u64,
    /// Free space reported for every path.
    pub free_space: u64,
}

impl FixedSpace {
    /// Reports `free_space` bytes free and `directory_size` bytes used.
    #[must_use]
    pub const fn new(directory_size: u64, free_space: u64) -> Self {
        Self {
            directory_size,
            free_space,
        }
    }

    /// Plenty of room for any test fixture.
    #[must_use]
    pub const fn roomy() -> Self {
        Self::new(1024, u64::MAX)
    }
}

impl SpaceProbe for FixedSpace {
    fn directory_size(&self, _path: &Utf8Path) -> Result<u64, DiskError> {
        Ok(self.directory_size)
    }

    fn free_space(&self, _path: &Utf8Path) -> Result<u64, DiskError> {
        Ok(self.free_space)
    }
}

/// Configuration rooted below `root`: backups in `root/backup`, sites in
/// `root/sites`, stock tool names otherwise.
#[must_use]
pub fn config_for(root: &Utf8Path) -> BackupConfig {
    BackupConfig {
        backup_root: root.join("backup").into_string(),
        sites_root: root.join("sites").into_string(),
        rclone_bin: String::from("rclone"),
        rclone_path: String::from("easyengine:easyengine"),
        no_of_backups: 7,
        ed_api_url: None,
        dash_retry_delay_secs: 0,
        ee_bin: String::from("ee"),
        seven_zip_bin: String::from("7z"),
        unzip_bin: String::from("unzip"),
        rsync_bin: String::from("rsync"),
        runtime_user: String::from("www-data"),
        log_level: String::from("info"),
    }
}

/// Remote listing with `count` generations, one per day of January 2024.
#[must_use]
pub fn generation_listing(count: u32) -> String {
    (1..=count)
        .map(|day| format!("17040{day:05}_2024-01-{day:02}-00-00-00/\n"))
        .collect()
}
