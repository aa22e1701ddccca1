//! Remote execution over SSH.
//!
//! One logical session is three connections to the same server: an exec
//! connection for one-shot commands, an SFTP connection for transfers and an
//! interactive shell (with a PTY) that runs the generated stage scripts.
//! ssh2 is blocking, so every call runs on the blocking pool.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ssh2::{Channel, Session, Sftp};
use tracing::{debug, info, warn};

use super::error::{ChannelError, ChannelResult};
use super::sentinel::{Sentinel, SentinelVerdict, ShellTranscript};
use super::{CommandOutput, ScriptOutcome, SessionChannel, ToolInvocation, TransferDirection};
use crate::domain::{Credentials, ExecutionMode, HostOs, PathStyle, Server};
use crate::script::ScriptBuilder;

/// Timing knobs for SSH sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshSettings {
    /// TCP connect and handshake limit per sub-connection.
    pub connect_timeout: Duration,

    /// How long one shell read blocks before the deadline is rechecked.
    pub poll_interval: Duration,

    /// Limit for one-shot commands and transfers.
    pub command_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(500),
            command_timeout: Duration::from_secs(600),
        }
    }
}

struct SshSessions {
    exec: Session,
    // Kept alive for the lifetime of `sftp`.
    _sftp_session: Session,
    sftp: Sftp,
    shell_session: Session,
    shell: Channel,
}

type SharedHost = Arc<Mutex<Box<dyn RemoteHost>>>;

/// SSH-backed channel for one target.
pub struct SshChannel {
    server: Server,
    settings: SshSettings,
    host: Option<SharedHost>,
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannel")
            .field("server", &self.server.key())
            .field("open", &self.host.is_some())
            .finish()
    }
}

fn millis(d: Duration) -> u32 {
    d.as_millis().min(u32::MAX as u128) as u32
}

fn connect(creds: &Credentials, password: &str, settings: &SshSettings) -> ChannelResult<Session> {
    let connect_err = |reason: String| ChannelError::Connect {
        address: creds.address.clone(),
        reason,
    };
    let addr = (creds.address.as_str(), creds.port)
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?
        .next()
        .ok_or_else(|| connect_err("address did not resolve".to_string()))?;
    let tcp = TcpStream::connect_timeout(&addr, settings.connect_timeout)
        .map_err(|e| connect_err(e.to_string()))?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(millis(settings.connect_timeout));
    session
        .handshake()
        .map_err(|e| connect_err(e.to_string()))?;
    session
        .userauth_password(&creds.user, password)
        .map_err(|e| ChannelError::Auth {
            user: creds.user.clone(),
            address: creds.address.clone(),
            reason: e.to_string(),
        })?;
    if !session.authenticated() {
        return Err(ChannelError::Auth {
            user: creds.user.clone(),
            address: creds.address.clone(),
            reason: "server rejected credentials".to_string(),
        });
    }
    Ok(session)
}

fn open_sessions(
    creds: &Credentials,
    password: &str,
    settings: &SshSettings,
) -> ChannelResult<SshSessions> {
    let exec = connect(creds, password, settings)?;
    exec.set_timeout(millis(settings.command_timeout));

    let sftp_session = connect(creds, password, settings)?;
    sftp_session.set_timeout(millis(settings.command_timeout));
    let sftp = sftp_session.sftp().map_err(|e| ChannelError::SubConnection {
        channel: "sftp",
        reason: e.to_string(),
    })?;

    let shell_session = connect(creds, password, settings)?;
    let shell_err = |e: ssh2::Error| ChannelError::SubConnection {
        channel: "shell",
        reason: e.to_string(),
    };
    let mut shell = shell_session.channel_session().map_err(shell_err)?;
    shell.request_pty("vt100", None, None).map_err(shell_err)?;
    shell.shell().map_err(shell_err)?;
    shell_session.set_timeout(millis(settings.poll_interval));

    Ok(SshSessions {
        exec,
        _sftp_session: sftp_session,
        sftp,
        shell_session,
        shell,
    })
}

/// What one shell read produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellRead {
    Data(usize),
    /// Nothing arrived within the poll interval.
    Idle,
    Closed,
}

/// Blocking operations an open SSH session offers the channel.
pub trait RemoteHost: Send {
    fn exec(&mut self, command: &str) -> ChannelResult<CommandOutput>;

    fn upload(&mut self, local: &Path, remote: &str) -> ChannelResult<()>;

    fn download(&mut self, remote: &str, local: &Path) -> ChannelResult<()>;

    fn shell_write(&mut self, bytes: &[u8]) -> ChannelResult<()>;

    fn shell_read(&mut self, buf: &mut [u8]) -> ChannelResult<ShellRead>;

    fn close(&mut self);
}

fn transfer_err(path: &str) -> impl Fn(String) -> ChannelError + '_ {
    move |reason| ChannelError::Transfer {
        path: path.to_string(),
        reason,
    }
}

impl RemoteHost for SshSessions {
    fn exec(&mut self, command: &str) -> ChannelResult<CommandOutput> {
        let mut channel = self.exec.channel_session()?;
        channel.exec(command)?;
        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;
        channel.wait_close()?;
        Ok(CommandOutput {
            exit_code: Some(channel.exit_status()?),
            stdout,
            stderr,
        })
    }

    fn upload(&mut self, local: &Path, remote: &str) -> ChannelResult<()> {
        let err = transfer_err(remote);
        let bytes = std::fs::read(local).map_err(|e| err(e.to_string()))?;
        let mut file = self
            .sftp
            .create(Path::new(remote))
            .map_err(|e| err(e.to_string()))?;
        file.write_all(&bytes).map_err(|e| err(e.to_string()))?;
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> ChannelResult<()> {
        let err = transfer_err(remote);
        let mut file = self
            .sftp
            .open(Path::new(remote))
            .map_err(|e| err(e.to_string()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| err(e.to_string()))?;
        std::fs::write(local, bytes).map_err(|e| err(e.to_string()))?;
        Ok(())
    }

    fn shell_write(&mut self, bytes: &[u8]) -> ChannelResult<()> {
        self.shell.write_all(bytes)?;
        self.shell.flush()?;
        Ok(())
    }

    fn shell_read(&mut self, buf: &mut [u8]) -> ChannelResult<ShellRead> {
        match self.shell.read(buf) {
            Ok(0) if self.shell.eof() => Ok(ShellRead::Closed),
            Ok(0) => Ok(ShellRead::Idle),
            Ok(n) => Ok(ShellRead::Data(n)),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(ShellRead::Idle)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        self.shell_session.set_timeout(1000);
        let _ = self.shell.write_all(b"exit\n");
        let _ = self.shell.send_eof();
        let _ = self.shell.close();
        for session in [&self.exec, &self._sftp_session, &self.shell_session] {
            let _ = session.disconnect(None, "fpgabuild session closed", None);
        }
    }
}

/// Discard whatever the shell printed since the last command (prompts, banners).
fn drain_shell(host: &mut dyn RemoteHost) -> ChannelResult<()> {
    let mut buf = [0u8; 4096];
    while let ShellRead::Data(_) = host.shell_read(&mut buf)? {}
    Ok(())
}

/// Type `line` into the shell and read until the sentinel completes or the
/// deadline passes. A zero timeout waits indefinitely.
fn run_in_shell(
    host: &mut dyn RemoteHost,
    line: &str,
    sentinel: Sentinel,
    timeout: Duration,
    what: &str,
) -> ChannelResult<(SentinelVerdict, String)> {
    drain_shell(host)?;
    host.shell_write(format!("{line}\n").as_bytes())?;

    let deadline = Instant::now() + timeout;
    let mut transcript = ShellTranscript::new(sentinel);
    let mut buf = [0u8; 8192];
    loop {
        if !timeout.is_zero() && Instant::now() >= deadline {
            return Err(ChannelError::Timeout {
                what: what.to_string(),
                after: timeout,
            });
        }
        match host.shell_read(&mut buf)? {
            ShellRead::Data(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                if let Some(verdict) = transcript.feed(&chunk) {
                    return Ok((verdict, transcript.into_text()));
                }
            }
            ShellRead::Idle => {}
            ShellRead::Closed => {
                return Err(ChannelError::Disconnected {
                    what: what.to_string(),
                })
            }
        }
    }
}

fn join_remote(style: PathStyle, dir: &str, name: &str) -> String {
    let sep = style.separator();
    format!("{}{}{}", dir.trim_end_matches(['/', '\\']), sep, name)
}

impl SshChannel {
    pub fn new(server: Server, settings: SshSettings) -> Self {
        Self {
            server,
            settings,
            host: None,
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Run `f` against the open session on the blocking pool.
    async fn with_host<T, F>(&self, f: F) -> ChannelResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RemoteHost) -> ChannelResult<T> + Send + 'static,
    {
        let host = self.host.clone().ok_or(ChannelError::NotOpen)?;
        tokio::task::spawn_blocking(move || {
            let mut guard = host
                .lock()
                .map_err(|_| ChannelError::Task("ssh session lock poisoned".to_string()))?;
            f(&mut **guard)
        })
        .await?
    }
}

#[async_trait]
impl SessionChannel for SshChannel {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Remote
    }

    fn host_os(&self) -> HostOs {
        self.server.os
    }

    fn is_open(&self) -> bool {
        self.host.is_some()
    }

    async fn open(&mut self, credentials: Option<&Credentials>) -> ChannelResult<()> {
        if self.host.is_some() {
            return Ok(());
        }
        let creds = credentials
            .cloned()
            .unwrap_or_else(|| self.server.credentials());
        let password = creds.password.clone().ok_or_else(|| ChannelError::Auth {
            user: creds.user.clone(),
            address: creds.address.clone(),
            reason: "no password supplied".to_string(),
        })?;
        let settings = self.settings;
        let start = Instant::now();
        let sessions =
            tokio::task::spawn_blocking(move || open_sessions(&creds, &password, &settings))
                .await??;
        info!(
            server = %self.server,
            duration_ms = start.elapsed().as_millis() as u64,
            "ssh session opened"
        );
        let host: Box<dyn RemoteHost> = Box::new(sessions);
        self.host = Some(Arc::new(Mutex::new(host)));
        Ok(())
    }

    async fn run_one_shot(&mut self, command: &str) -> ChannelResult<CommandOutput> {
        let command = command.to_string();
        debug!(server = %self.server, command = %command, "exec");
        self.with_host(move |host| host.exec(&command)).await
    }

    async fn run_scripted(&mut self, invocation: &ToolInvocation) -> ChannelResult<ScriptOutcome> {
        let style = self.server.os.path_style();
        let builder = ScriptBuilder::for_host(self.server.os);
        let sentinel = Sentinel::new(&invocation.stage);
        let script = builder.render(invocation, &sentinel);

        let script_path = join_remote(style, &invocation.workdir, &script.file_name);
        let log_path = join_remote(style, &invocation.workdir, &invocation.log_name());

        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(script.text.as_bytes())?;
        staged.flush()?;
        let staged_path: PathBuf = staged.path().to_path_buf();
        let remote_script = script_path.clone();
        self.with_host(move |host| host.upload(&staged_path, &remote_script))
            .await?;
        drop(staged);

        if let Some(chmod) = builder.chmod_command(&script_path) {
            let out = self.run_one_shot(&chmod).await?;
            if !out.success() {
                warn!(server = %self.server, script = %script_path, "chmod failed");
            }
        }

        let launch = builder.launch_command(&script_path, &log_path);
        let timeout = invocation.timeout;
        let what = format!("{} sentinel", invocation.stage);
        let start = Instant::now();
        let (verdict, output) = self
            .with_host(move |host| run_in_shell(host, &launch, sentinel, timeout, &what))
            .await?;

        debug!(
            server = %self.server,
            stage = %invocation.stage,
            verdict = ?verdict,
            digest = %script.digest,
            duration_ms = start.elapsed().as_millis() as u64,
            "remote script finished"
        );

        Ok(ScriptOutcome {
            success: verdict == SentinelVerdict::Success,
            exit_code: None,
            output,
            script_digest: Some(script.digest),
        })
    }

    async fn transfer(
        &mut self,
        direction: TransferDirection,
        local: &Path,
        remote: &str,
    ) -> ChannelResult<()> {
        let local = local.to_path_buf();
        let remote = remote.to_string();
        self.with_host(move |host| match direction {
            TransferDirection::Upload => host.upload(&local, &remote),
            TransferDirection::Download => host.download(&remote, &local),
        })
        .await
    }

    async fn close(&mut self) {
        let Some(host) = self.host.take() else {
            return;
        };
        let joined = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = host.lock() {
                guard.close();
            }
        })
        .await;
        if let Err(e) = joined {
            warn!(server = %self.server, error = %e, "ssh close task failed");
        }
        debug!(server = %self.server, "ssh session closed");
    }
}
