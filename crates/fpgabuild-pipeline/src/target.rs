//! `BuildTarget`: one FPGA device bound to one build server.
//!
//! A target owns its session channel exclusively. Each operation returns the
//! `Outcome` it produced and records it; the first failure sticks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fpgabuild_core::script::quote_posix;
use fpgabuild_core::{
    obs, Credentials, ExecutionMode, HostOs, Outcome, ProgressSink, SessionChannel, Server,
    Subdir, TargetLayout, TargetSpec, TransferDirection,
};
use tracing::{debug, info, warn};

use crate::pipeline::{GroupReport, StagePipeline};
use crate::progress::{StageReporter, TargetLog};
use crate::purge::{self, PurgeScope, SELECTIVE_DIRS};
use crate::readiness::{ready_for_compilation, ready_for_synthesis, Readiness};
use crate::report::ResourceReporter;
use crate::runner::StageContext;
use crate::settings::BuildSettings;
use crate::stage::StageGroup;

pub struct BuildTarget {
    spec: TargetSpec,
    server: Option<Server>,
    channel: Box<dyn SessionChannel>,
    settings: BuildSettings,
    reporter: StageReporter,
    outcome: Outcome,
}

impl std::fmt::Debug for BuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildTarget")
            .field("id", &self.spec.id)
            .field("server", &self.server.as_ref().map(Server::key))
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl BuildTarget {
    pub fn new(
        spec: TargetSpec,
        server: Option<Server>,
        channel: Box<dyn SessionChannel>,
        settings: BuildSettings,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let reporter = StageReporter::new(
            spec.id.clone(),
            sink,
            TargetLog::new(&spec.local_root, &spec.id),
        );
        Self {
            spec,
            server,
            channel,
            settings,
            reporter,
            outcome: Outcome::Ok,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    pub fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    /// Outcome so far: `Ok` until something fails, `Skipped` for a target
    /// that is not built.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn reporter(&self) -> &StageReporter {
        &self.reporter
    }

    /// Layout on the host that runs the tools.
    pub fn layout(&self) -> TargetLayout {
        self.spec.exec_layout(self.channel.host_os())
    }

    fn record(&mut self, outcome: Outcome) -> Outcome {
        self.outcome = self.outcome.then(outcome);
        outcome
    }

    pub fn should_skip(&self) -> bool {
        self.spec.should_skip()
    }

    pub fn check_readiness(&self, group: StageGroup) -> Readiness {
        match group {
            StageGroup::Hardware => ready_for_synthesis(&self.spec, self.server.as_ref()),
            StageGroup::Software => ready_for_compilation(&self.spec, self.server.as_ref()),
        }
    }

    /// Open the channel and create the layout directories on the build host.
    pub async fn login(&mut self, credentials: Option<&Credentials>) -> Outcome {
        if let Err(e) = self.channel.open(credentials).await {
            obs::emit_channel_error(&self.spec.id, "login", &e);
            self.reporter.note(&format!("Login failed: {e}"));
            return self.record(Outcome::AuthenticationFailed);
        }
        info!(target_id = %self.spec.id, mode = ?self.channel.mode(), "logged in");

        let layout = self.layout();
        let dirs: Vec<String> = Subdir::ALL.iter().map(|d| layout.subdir(*d)).collect();
        match self.channel.make_dirs(&dirs).await {
            Ok(out) if out.success() => Outcome::Ok,
            Ok(out) => {
                warn!(target_id = %self.spec.id, stderr = %out.stderr.trim(), "directory creation failed");
                self.record(Outcome::DirectoryCreateFailed)
            }
            Err(e) => {
                obs::emit_channel_error(&self.spec.id, "make_dirs", &e);
                self.record(Outcome::DirectoryCreateFailed)
            }
        }
    }

    pub async fn logout(&mut self) {
        self.channel.close().await;
        debug!(target_id = %self.spec.id, "logged out");
    }

    /// Delete generated files. A full purge recreates the emptied directories.
    pub async fn purge_outputs(&mut self, scope: &PurgeScope) -> Outcome {
        let layout = self.layout();
        let paths = match scope {
            PurgeScope::All => purge::plan_all(&layout),
            PurgeScope::Software => purge::plan_software(&self.spec, &layout),
            PurgeScope::Selective(cores) => {
                let cores = if cores.is_empty() {
                    purge::default_cores(&self.spec)
                } else {
                    let (known, unknown) = purge::split_known_cores(&self.spec, cores);
                    if !unknown.is_empty() {
                        warn!(target_id = %self.spec.id, cores = ?unknown, "ignoring names that are not cores of this target");
                        self.reporter.note(&format!("Not a core: {}", unknown.join(", ")));
                    }
                    known
                };
                if cores.is_empty() {
                    return Outcome::Ok;
                }
                let mut listings = HashMap::new();
                for dir in SELECTIVE_DIRS {
                    match self.channel.list_dir(&layout.subdir(dir)).await {
                        Ok(entries) => {
                            listings.insert(dir, entries);
                        }
                        Err(e) => {
                            obs::emit_channel_error(&self.spec.id, "purge", &e);
                            return self.record(Outcome::PurgeFailed);
                        }
                    }
                }
                purge::plan_selective(&self.spec, &layout, &cores, &listings)
            }
        };

        if paths.is_empty() {
            return Outcome::Ok;
        }
        info!(target_id = %self.spec.id, scope = ?scope, paths = paths.len(), "purging");
        self.reporter.detail(&format!("Purging {} path(s)", paths.len()));

        let removed = match self.channel.remove_paths(&paths).await {
            Ok(out) => out.success(),
            Err(e) => {
                obs::emit_channel_error(&self.spec.id, "purge", &e);
                false
            }
        };
        if !removed {
            self.reporter.note("Purge...ERROR!");
            return self.record(Outcome::PurgeFailed);
        }

        if *scope == PurgeScope::All {
            match self.channel.make_dirs(&paths).await {
                Ok(out) if out.success() => {}
                _ => return self.record(Outcome::DirectoryCreateFailed),
            }
        }
        Outcome::Ok
    }

    async fn run_group(&mut self, group: StageGroup, force_clean: bool) -> GroupReport {
        if self.should_skip() {
            info!(target_id = %self.spec.id, group = ?group, "target skipped");
            return GroupReport::not_run(group, self.record(Outcome::Skipped));
        }

        let readiness = self.check_readiness(group);
        if !readiness.is_ready() {
            for missing in &readiness.missing {
                self.reporter.note(&format!("Not ready: {missing}"));
            }
            return GroupReport::not_run(group, self.record(Outcome::NotReady));
        }

        if force_clean {
            let scope = match group {
                StageGroup::Hardware => PurgeScope::All,
                StageGroup::Software => PurgeScope::Software,
            };
            let purged = self.purge_outputs(&scope).await;
            if purged.is_failure() {
                return GroupReport::not_run(group, purged);
            }
        }

        let mut ctx = StageContext {
            layout: self.spec.exec_layout(self.channel.host_os()),
            channel: self.channel.as_mut(),
            spec: &self.spec,
            settings: &self.settings,
            reporter: &self.reporter,
        };
        let report = StagePipeline::run_group(&mut ctx, group).await;
        self.record(report.outcome);
        report
    }

    /// Generate through codelet merge. Readiness failures return before any
    /// channel call.
    pub async fn run_hardware_pipeline(&mut self, force_clean: bool) -> GroupReport {
        self.run_group(StageGroup::Hardware, force_clean).await
    }

    pub async fn run_software_pipeline(&mut self, force_clean: bool) -> GroupReport {
        self.run_group(StageGroup::Software, force_clean).await
    }

    /// Bring the build host's `output/` directory into the local target root.
    ///
    /// Local builds already write there. Remote Windows hosts are not
    /// supported.
    pub async fn download_outputs(&mut self) -> Outcome {
        if self.channel.mode() == ExecutionMode::Local {
            return Outcome::Ok;
        }
        if self.channel.host_os() == HostOs::Windows {
            warn!(target_id = %self.spec.id, "output download from Windows hosts is not supported");
            self.reporter.note("Download...ERROR! (not supported on Windows build servers)");
            return self.record(Outcome::DownloadUnsupported);
        }

        self.reporter.note("Download...");
        let outcome = match self.fetch_archive().await {
            Ok(()) => Outcome::Ok,
            Err(e) => {
                warn!(target_id = %self.spec.id, error = %e, "output download failed");
                self.reporter.detail(&format!("Download failed: {e}"));
                Outcome::OutputDownloadFailed
            }
        };
        self.reporter
            .note(if outcome.is_ok() { "Download...Complete!" } else { "Download...ERROR!" });
        self.record(outcome)
    }

    fn archive_name(&self) -> String {
        format!("{}_output.tar.gz", self.spec.id)
    }

    async fn fetch_archive(&mut self) -> anyhow::Result<()> {
        let layout = self.layout();
        let remote_archive = format!(
            "{}/{}",
            self.settings.scratch_dir.trim_end_matches('/'),
            self.archive_name()
        );
        let pack = format!(
            "tar -czf {} -C {} {}",
            quote_posix(&remote_archive),
            quote_posix(&layout.root),
            Subdir::Output.name()
        );
        let out = self.channel.run_one_shot(&pack).await?;
        if !out.success() {
            anyhow::bail!("remote archive failed: {}", out.stderr.trim());
        }

        let local_root = self.spec.local_root.clone();
        tokio::fs::create_dir_all(&local_root).await?;
        let local_archive = local_root.join(self.archive_name());
        let fetched = self
            .channel
            .transfer(TransferDirection::Download, &local_archive, &remote_archive)
            .await;

        let cleanup = format!("rm -f {}", quote_posix(&remote_archive));
        if let Err(e) = self.channel.run_one_shot(&cleanup).await {
            debug!(target_id = %self.spec.id, error = %e, "remote archive not removed");
        }
        fetched?;

        let extracted = extract_archive(&local_archive, &local_root).await;
        if let Err(e) = tokio::fs::remove_file(&local_archive).await {
            debug!(path = %local_archive.display(), error = %e, "local archive not removed");
        }
        extracted
    }

    /// Summarise resource usage for this target.
    pub fn compile_resource_report(
        &self,
        reporter: &dyn ResourceReporter,
    ) -> std::io::Result<Option<PathBuf>> {
        let written = reporter.compile(&self.spec)?;
        if let Some(path) = &written {
            self.reporter
                .detail(&format!("Resource report written to {}", path.display()));
        }
        Ok(written)
    }
}

async fn extract_archive(archive: &Path, into: &Path) -> anyhow::Result<()> {
    let status = tokio::process::Command::new("tar")
        .arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(into)
        .status()
        .await?;
    if !status.success() {
        anyhow::bail!("tar -xzf {} exited with {status}", archive.display());
    }
    Ok(())
}
