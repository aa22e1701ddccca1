//! Session channels: the execution-mode abstraction.
//!
//! A [`SessionChannel`] runs the same pipeline either as local subprocesses
//! ([`local::LocalChannel`]) or as generated scripts over a persistent SSH
//! session ([`ssh::SshChannel`]). Pipelines only see typed results; how a
//! remote script reports completion is private to the session layer.
//!
//! # Modules
//!
//! - [`error`]    - `ChannelError` / `ChannelResult`
//! - [`sentinel`] - completion protocol decoder for the interactive shell
//! - [`local`]    - subprocess execution on this machine
//! - [`ssh`]      - three-connection SSH session (exec, sftp, shell)

pub mod error;
pub mod local;
pub mod sentinel;
pub mod ssh;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Credentials, ExecutionMode, HostOs};
use crate::script::{quote_batch, quote_posix, render_command_line, ScriptDialect};

pub use error::{ChannelError, ChannelResult};
pub use local::LocalChannel;
pub use sentinel::{Sentinel, SentinelVerdict, ShellTranscript};
pub use ssh::{RemoteHost, ShellRead, SshChannel, SshSettings};

/// Output of a one-shot command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Direction of a file transfer, seen from this machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// One invocation of an external build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Stage label; names the generated script and its log.
    pub stage: String,

    pub program: String,

    pub args: Vec<String>,

    /// Working directory on the build host.
    pub workdir: String,

    /// Wall-clock limit for the whole invocation.
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(
        stage: impl Into<String>,
        program: impl Into<String>,
        workdir: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            stage: stage.into(),
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// File name of the stage's captured output, inside `workdir`.
    pub fn log_name(&self) -> String {
        format!("{}.out", self.stage)
    }

    /// The command line as it would be typed on a host of `dialect`.
    pub fn command_line(&self, dialect: ScriptDialect) -> String {
        render_command_line(&self.program, &self.args, dialect)
    }
}

/// Typed result of a scripted invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub success: bool,

    /// Exit status when the mode reports one (local mode only).
    pub exit_code: Option<i32>,

    /// Captured output (the shell transcript in remote mode).
    pub output: String,

    /// Digest of the generated script, when one was generated.
    pub script_digest: Option<String>,
}

/// One execution mode: local subprocesses or a remote session.
///
/// Channels are owned by exactly one target and never shared. `close` is
/// idempotent and best-effort.
///
/// The file helpers have default implementations built on
/// [`SessionChannel::run_one_shot`] using the host's shell dialect; the local
/// channel overrides them with direct filesystem calls.
#[async_trait]
pub trait SessionChannel: Send {
    fn mode(&self) -> ExecutionMode;

    /// OS of the host that executes commands.
    fn host_os(&self) -> HostOs;

    fn is_open(&self) -> bool;

    /// Establish the channel. Remote channels require a password in
    /// `credentials`; local channels ignore it.
    async fn open(&mut self, credentials: Option<&Credentials>) -> ChannelResult<()>;

    async fn run_one_shot(&mut self, command: &str) -> ChannelResult<CommandOutput>;

    /// Run a tool invocation to completion and classify the result.
    async fn run_scripted(&mut self, invocation: &ToolInvocation) -> ChannelResult<ScriptOutcome>;

    async fn transfer(
        &mut self,
        direction: TransferDirection,
        local: &Path,
        remote: &str,
    ) -> ChannelResult<()>;

    async fn close(&mut self);

    /// Entry names in `dir`; a missing directory lists as empty.
    async fn list_dir(&mut self, dir: &str) -> ChannelResult<Vec<String>> {
        let command = match ScriptDialect::for_host(self.host_os()) {
            ScriptDialect::Posix => format!("ls -1A {} 2>/dev/null", quote_posix(dir)),
            ScriptDialect::Batch => format!("dir /b {} 2>nul", quote_batch(dir)),
        };
        let output = self.run_one_shot(&command).await?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn make_dirs(&mut self, dirs: &[String]) -> ChannelResult<CommandOutput> {
        let command = match ScriptDialect::for_host(self.host_os()) {
            ScriptDialect::Posix => {
                let quoted: Vec<String> = dirs.iter().map(|d| quote_posix(d)).collect();
                format!("mkdir -p {}", quoted.join(" "))
            }
            ScriptDialect::Batch => dirs
                .iter()
                .map(|d| {
                    let q = quote_batch(d);
                    format!("if not exist {q} mkdir {q}")
                })
                .collect::<Vec<_>>()
                .join(" & "),
        };
        self.run_one_shot(&command).await
    }

    async fn remove_paths(&mut self, paths: &[String]) -> ChannelResult<CommandOutput> {
        if paths.is_empty() {
            return Ok(CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            });
        }
        let command = match ScriptDialect::for_host(self.host_os()) {
            ScriptDialect::Posix => {
                let quoted: Vec<String> = paths.iter().map(|p| quote_posix(p)).collect();
                format!("rm -rf {}", quoted.join(" "))
            }
            ScriptDialect::Batch => paths
                .iter()
                .map(|p| {
                    let q = quote_batch(p);
                    let contents = quote_batch(&format!("{p}\\*"));
                    format!("(if exist {contents} (rmdir /s /q {q}) else (if exist {q} del /f /q {q}))")
                })
                .collect::<Vec<_>>()
                .join(" & "),
        };
        self.run_one_shot(&command).await
    }

    async fn copy_file(&mut self, from: &str, to: &str) -> ChannelResult<CommandOutput> {
        let command = match ScriptDialect::for_host(self.host_os()) {
            ScriptDialect::Posix => format!("cp -f {} {}", quote_posix(from), quote_posix(to)),
            ScriptDialect::Batch => format!("copy /y {} {}", quote_batch(from), quote_batch(to)),
        };
        self.run_one_shot(&command).await
    }

    /// Whether `path` exists on the build host.
    async fn exists(&mut self, path: &str) -> ChannelResult<bool> {
        let command = match ScriptDialect::for_host(self.host_os()) {
            ScriptDialect::Posix => format!("test -e {}", quote_posix(path)),
            ScriptDialect::Batch => format!("if exist {} (exit /b 0) else (exit /b 1)", quote_batch(path)),
        };
        Ok(self.run_one_shot(&command).await?.success())
    }
}
