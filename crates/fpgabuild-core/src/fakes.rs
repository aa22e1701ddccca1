//! In-memory test doubles for channels, password providers and progress sinks.
//!
//! [`ScriptedChannel`] is cheaply clonable; clones share state, so a test can
//! hand one clone to a target and keep another to inspect the recorded calls.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::credentials::PasswordProvider;
use crate::domain::{CoreError, CoreResult, Credentials, ExecutionMode, HostOs};
use crate::progress::{format_line, ProgressSink};
use crate::session::{
    ChannelError, ChannelResult, CommandOutput, ScriptOutcome, SessionChannel, ToolInvocation,
    TransferDirection,
};

/// One recorded channel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Open { password: Option<String> },
    OneShot(String),
    Scripted { stage: String, program: String, args: Vec<String>, workdir: String },
    Transfer { direction: TransferDirection, local: PathBuf, remote: String },
    ListDir(String),
    MakeDirs(Vec<String>),
    RemovePaths(Vec<String>),
    CopyFile { from: String, to: String },
    Exists(String),
    Close,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<ChannelCall>,
    open: bool,
    failing_stages: HashSet<String>,
    erroring_stages: HashSet<String>,
    stage_output: HashMap<String, String>,
    failing_commands: Vec<String>,
    listings: HashMap<String, Vec<String>>,
    remote_files: HashMap<String, String>,
    missing_paths: HashSet<String>,
    reject_login: bool,
    fail_make_dirs: bool,
    fail_remove: bool,
    fail_transfers: bool,
    delay: Option<Duration>,
}

/// Channel double that records every call and answers from a script.
#[derive(Debug, Clone)]
pub struct ScriptedChannel {
    mode: ExecutionMode,
    os: HostOs,
    state: Arc<Mutex<State>>,
}

impl ScriptedChannel {
    pub fn new(mode: ExecutionMode, os: HostOs) -> Self {
        Self {
            mode,
            os,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn local() -> Self {
        Self::new(ExecutionMode::Local, HostOs::Linux)
    }

    pub fn remote(os: HostOs) -> Self {
        Self::new(ExecutionMode::Remote, os)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the calls from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: ChannelCall) {
        self.state().calls.push(call);
    }

    /// Scripted runs of `stage` report failure (error sentinel / non-zero exit).
    pub fn fail_stage(self, stage: &str) -> Self {
        self.state().failing_stages.insert(stage.to_string());
        self
    }

    /// Scripted runs of `stage` return a transport error.
    pub fn error_stage(self, stage: &str) -> Self {
        self.state().erroring_stages.insert(stage.to_string());
        self
    }

    pub fn with_stage_output(self, stage: &str, output: &str) -> Self {
        self.state()
            .stage_output
            .insert(stage.to_string(), output.to_string());
        self
    }

    /// One-shot commands starting with `prefix` exit with status 1.
    pub fn fail_command(self, prefix: &str) -> Self {
        self.state().failing_commands.push(prefix.to_string());
        self
    }

    pub fn with_listing<I, S>(self, dir: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .listings
            .insert(dir.to_string(), entries.into_iter().map(Into::into).collect());
        self
    }

    /// Content served when `remote` is downloaded.
    pub fn with_remote_file(self, remote: &str, content: &str) -> Self {
        self.state()
            .remote_files
            .insert(remote.to_string(), content.to_string());
        self
    }

    /// `exists(path)` answers false.
    pub fn with_missing(self, path: &str) -> Self {
        self.state().missing_paths.insert(path.to_string());
        self
    }

    pub fn reject_login(self) -> Self {
        self.state().reject_login = true;
        self
    }

    pub fn fail_make_dirs(self) -> Self {
        self.state().fail_make_dirs = true;
        self
    }

    pub fn fail_remove(self) -> Self {
        self.state().fail_remove = true;
        self
    }

    pub fn fail_transfers(self) -> Self {
        self.state().fail_transfers = true;
        self
    }

    /// Each scripted run sleeps this long before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Stage labels of scripted runs, in order.
    pub fn scripted_stages(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                ChannelCall::Scripted { stage, .. } => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every path passed to `remove_paths`, flattened.
    pub fn removed_paths(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                ChannelCall::RemovePaths(paths) => Some(paths.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn one_shots(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                ChannelCall::OneShot(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    fn ok_output() -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        }
    }

    fn failed_output(message: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: message.to_string(),
        }
    }
}

#[async_trait]
impl SessionChannel for ScriptedChannel {
    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn host_os(&self) -> HostOs {
        self.os
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    async fn open(&mut self, credentials: Option<&Credentials>) -> ChannelResult<()> {
        let password = credentials.and_then(|c| c.password.clone());
        let mut state = self.state();
        state.calls.push(ChannelCall::Open {
            password: password.clone(),
        });
        if self.mode == ExecutionMode::Remote && (state.reject_login || password.is_none()) {
            let (user, address) = credentials
                .map(|c| (c.user.clone(), c.address.clone()))
                .unwrap_or_default();
            return Err(ChannelError::Auth {
                user,
                address,
                reason: "rejected by scripted channel".to_string(),
            });
        }
        state.open = true;
        Ok(())
    }

    async fn run_one_shot(&mut self, command: &str) -> ChannelResult<CommandOutput> {
        let mut state = self.state();
        state.calls.push(ChannelCall::OneShot(command.to_string()));
        if !state.open {
            return Err(ChannelError::NotOpen);
        }
        if state.failing_commands.iter().any(|p| command.starts_with(p)) {
            return Ok(Self::failed_output("scripted failure"));
        }
        Ok(Self::ok_output())
    }

    async fn run_scripted(&mut self, invocation: &ToolInvocation) -> ChannelResult<ScriptOutcome> {
        let delay = {
            let mut state = self.state();
            state.calls.push(ChannelCall::Scripted {
                stage: invocation.stage.clone(),
                program: invocation.program.clone(),
                args: invocation.args.clone(),
                workdir: invocation.workdir.clone(),
            });
            if !state.open {
                return Err(ChannelError::NotOpen);
            }
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if state.erroring_stages.contains(&invocation.stage) {
            return Err(ChannelError::Disconnected {
                what: format!("{} sentinel", invocation.stage),
            });
        }
        let success = !state.failing_stages.contains(&invocation.stage);
        Ok(ScriptOutcome {
            success,
            exit_code: Some(if success { 0 } else { 1 }),
            output: state
                .stage_output
                .get(&invocation.stage)
                .cloned()
                .unwrap_or_default(),
            script_digest: None,
        })
    }

    async fn transfer(
        &mut self,
        direction: TransferDirection,
        local: &Path,
        remote: &str,
    ) -> ChannelResult<()> {
        let content = {
            let mut state = self.state();
            state.calls.push(ChannelCall::Transfer {
                direction,
                local: local.to_path_buf(),
                remote: remote.to_string(),
            });
            if state.fail_transfers {
                return Err(ChannelError::Transfer {
                    path: remote.to_string(),
                    reason: "scripted transfer failure".to_string(),
                });
            }
            match direction {
                TransferDirection::Download => state.remote_files.get(remote).cloned(),
                TransferDirection::Upload => {
                    if let Ok(text) = std::fs::read_to_string(local) {
                        state.remote_files.insert(remote.to_string(), text);
                    }
                    None
                }
            }
        };
        if let Some(content) = content {
            std::fs::write(local, content)?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state();
        state.calls.push(ChannelCall::Close);
        state.open = false;
    }

    async fn list_dir(&mut self, dir: &str) -> ChannelResult<Vec<String>> {
        let mut state = self.state();
        state.calls.push(ChannelCall::ListDir(dir.to_string()));
        Ok(state.listings.get(dir).cloned().unwrap_or_default())
    }

    async fn make_dirs(&mut self, dirs: &[String]) -> ChannelResult<CommandOutput> {
        let mut state = self.state();
        state.calls.push(ChannelCall::MakeDirs(dirs.to_vec()));
        if state.fail_make_dirs {
            return Ok(Self::failed_output("mkdir: permission denied"));
        }
        Ok(Self::ok_output())
    }

    async fn remove_paths(&mut self, paths: &[String]) -> ChannelResult<CommandOutput> {
        let mut state = self.state();
        state.calls.push(ChannelCall::RemovePaths(paths.to_vec()));
        if state.fail_remove {
            return Ok(Self::failed_output("rm: device busy"));
        }
        Ok(Self::ok_output())
    }

    async fn copy_file(&mut self, from: &str, to: &str) -> ChannelResult<CommandOutput> {
        self.record(ChannelCall::CopyFile {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(Self::ok_output())
    }

    async fn exists(&mut self, path: &str) -> ChannelResult<bool> {
        let mut state = self.state();
        state.calls.push(ChannelCall::Exists(path.to_string()));
        Ok(!state.missing_paths.contains(path))
    }
}

/// Password provider that answers with a fixed password and counts prompts.
#[derive(Debug, Default)]
pub struct StaticPasswordProvider {
    password: Option<String>,
    prompts: AtomicUsize,
}

impl StaticPasswordProvider {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            prompts: AtomicUsize::new(0),
        }
    }

    /// A provider whose prompt always fails.
    pub fn refusing() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl PasswordProvider for StaticPasswordProvider {
    fn password(&self, user: &str, address: &str) -> CoreResult<String> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.password.clone().ok_or_else(|| CoreError::Password {
            user: user.to_string(),
            address: address.to_string(),
            reason: "prompt refused".to_string(),
        })
    }
}

/// Progress sink that keeps every line.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Lines reported for one target, without the target prefix.
    pub fn lines_for(&self, target: &str) -> Vec<String> {
        let prefix = format!("{target}: ");
        self.lines()
            .into_iter()
            .filter_map(|l| l.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn line(&self, target: &str, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format_line(target, message));
        }
    }
}
