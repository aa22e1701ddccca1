//! Local execution: each stage is a subprocess on this machine.
//!
//! No sentinel is needed here; success is the process exit code.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::error::{ChannelError, ChannelResult};
use super::{CommandOutput, ScriptOutcome, SessionChannel, ToolInvocation, TransferDirection};
use crate::domain::{Credentials, ExecutionMode, HostOs};

/// Subprocess-backed channel.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    open: bool,
    one_shot_timeout: Duration,
}

impl LocalChannel {
    pub fn new(one_shot_timeout: Duration) -> Self {
        Self {
            open: false,
            one_shot_timeout,
        }
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[cfg(windows)]
fn hide_window(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_window(_cmd: &mut Command) {}

async fn run_with_timeout(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
) -> ChannelResult<CommandOutput> {
    hide_window(&mut cmd);
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ChannelError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output = if timeout.is_zero() {
        child.wait_with_output().await?
    } else {
        tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ChannelError::Timeout {
                what: program.to_string(),
                after: timeout,
            })??
    };

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[async_trait]
impl SessionChannel for LocalChannel {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    fn host_os(&self) -> HostOs {
        HostOs::current()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self, _credentials: Option<&Credentials>) -> ChannelResult<()> {
        self.open = true;
        Ok(())
    }

    async fn run_one_shot(&mut self, command: &str) -> ChannelResult<CommandOutput> {
        if !self.open {
            return Err(ChannelError::NotOpen);
        }
        run_with_timeout(shell_command(command), command, self.one_shot_timeout).await
    }

    async fn run_scripted(&mut self, invocation: &ToolInvocation) -> ChannelResult<ScriptOutcome> {
        if !self.open {
            return Err(ChannelError::NotOpen);
        }
        let start = Instant::now();
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).current_dir(&invocation.workdir);

        let output = run_with_timeout(cmd, &invocation.program, invocation.timeout).await?;
        let combined = format!("{}{}", output.stdout, output.stderr);

        // Keep the captured output next to the tool's own logs, as remote runs do.
        let log_path = Path::new(&invocation.workdir).join(invocation.log_name());
        if let Err(e) = tokio::fs::write(&log_path, &combined).await {
            debug!(path = %log_path.display(), error = %e, "could not write stage output");
        }

        debug!(
            stage = %invocation.stage,
            exit_code = ?output.exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "local tool finished"
        );

        Ok(ScriptOutcome {
            success: output.success(),
            exit_code: output.exit_code,
            output: combined,
            script_digest: None,
        })
    }

    async fn transfer(
        &mut self,
        direction: TransferDirection,
        local: &Path,
        remote: &str,
    ) -> ChannelResult<()> {
        let other = PathBuf::from(remote);
        let (from, to) = match direction {
            TransferDirection::Upload => (local.to_path_buf(), other),
            TransferDirection::Download => (other, local.to_path_buf()),
        };
        if from == to {
            return Ok(());
        }
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| ChannelError::Transfer {
                path: from.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    async fn list_dir(&mut self, dir: &str) -> ChannelResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn make_dirs(&mut self, dirs: &[String]) -> ChannelResult<CommandOutput> {
        for dir in dirs {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }

    async fn remove_paths(&mut self, paths: &[String]) -> ChannelResult<CommandOutput> {
        for path in paths {
            let meta = match tokio::fs::symlink_metadata(path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if meta.is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }

    async fn copy_file(&mut self, from: &str, to: &str) -> ChannelResult<CommandOutput> {
        match tokio::fs::copy(from, to).await {
            Ok(_) => Ok(CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            }),
            Err(e) => Ok(CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: e.to_string(),
            }),
        }
    }

    async fn exists(&mut self, path: &str) -> ChannelResult<bool> {
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }
}
