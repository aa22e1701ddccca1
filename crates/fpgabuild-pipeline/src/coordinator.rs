//! Multi-target build coordinator.
//!
//! One worker task per non-skipped target, joined through a `JoinSet`. The
//! server pool and the credential cache are the only state shared between
//! workers; every worker owns its target and therefore its channel.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use fpgabuild_core::{
    obs, ConsoleSink, CredentialCache, LocalChannel, Outcome, PasswordProvider, ProgressSink,
    Server, SessionChannel, SshChannel, TargetSpec,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::gate::{BuildGate, GateVerdict, TargetReport};
use crate::purge::PurgeScope;
use crate::report::{MapReportExtractor, ResourceReporter};
use crate::settings::BuildSettings;
use crate::stage::StageGroup;
use crate::target::BuildTarget;

/// Picks the targets to skip. Returns target ids.
pub type SkipCallback = Arc<dyn Fn(&[TargetSpec]) -> Vec<String> + Send + Sync>;

/// Picks cores to purge selectively, keyed by target id. An empty list means
/// the target's opted-in cores.
pub type PurgeCallback = Arc<dyn Fn(&[TargetSpec]) -> HashMap<String, Vec<String>> + Send + Sync>;

/// Creates the channel a target will own.
pub trait ChannelFactory: Send + Sync {
    fn channel(&self, spec: &TargetSpec, server: Option<&Server>) -> Box<dyn SessionChannel>;
}

/// SSH channels for remote targets, subprocesses for local ones.
#[derive(Debug, Clone, Default)]
pub struct SessionFactory {
    settings: BuildSettings,
}

impl SessionFactory {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }
}

impl ChannelFactory for SessionFactory {
    fn channel(&self, spec: &TargetSpec, server: Option<&Server>) -> Box<dyn SessionChannel> {
        match server {
            Some(server) if spec.is_remote() => {
                Box::new(SshChannel::new(server.clone(), self.settings.ssh()))
            }
            _ => Box::new(LocalChannel::new(self.settings.command_timeout())),
        }
    }
}

/// Which stage groups a run builds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesizeOptions {
    pub hardware: bool,
    pub software: bool,
    /// Purge generated directories before each group.
    pub force_clean: bool,
    /// Fetch the remote `output/` directory after the build.
    pub download: bool,
}

impl Default for SynthesizeOptions {
    fn default() -> Self {
        Self {
            hardware: true,
            software: true,
            force_clean: false,
            download: true,
        }
    }
}

impl SynthesizeOptions {
    fn groups(&self) -> Vec<StageGroup> {
        let mut groups = Vec::new();
        if self.hardware {
            groups.push(StageGroup::Hardware);
        }
        if self.software {
            groups.push(StageGroup::Software);
        }
        groups
    }
}

#[derive(Debug, Default)]
struct AbortState {
    aborted: AtomicBool,
    notify: Notify,
}

/// Aborts every outstanding worker of a coordinator.
///
/// An abort applies to the run in progress; each run starts with the flag
/// cleared. Remote tools already running are not interrupted; the session is dropped
/// and the remote build may run to completion on its own.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.inner.aborted.store(false, Ordering::SeqCst);
    }

    async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Result of [`Coordinator::synthesize_all`].
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisResult {
    pub run_id: String,

    pub verdict: GateVerdict,

    /// One report per target, in manifest order.
    pub targets: Vec<TargetReport>,

    /// Resource reports written for targets that ended `Ok`.
    pub resource_reports: Vec<PathBuf>,

    pub duration_ms: u64,
}

impl SynthesisResult {
    pub fn outcome(&self) -> Outcome {
        self.verdict.outcome
    }
}

/// Round-robin assignment of remote targets to the server pool. Local
/// targets get no server.
pub fn assign_servers(targets: &[TargetSpec], servers: &[Server]) -> Vec<Option<Server>> {
    let mut next = 0;
    targets
        .iter()
        .map(|t| {
            if !t.is_remote() || servers.is_empty() {
                return None;
            }
            let server = servers[next % servers.len()].clone();
            next += 1;
            Some(server)
        })
        .collect()
}

pub struct Coordinator {
    targets: Vec<TargetSpec>,
    servers: Vec<Server>,
    settings: BuildSettings,
    credentials: Arc<CredentialCache>,
    factory: Arc<dyn ChannelFactory>,
    sink: Arc<dyn ProgressSink>,
    resources: Arc<dyn ResourceReporter>,
    skip: Option<SkipCallback>,
    purge: Option<PurgeCallback>,
    abort: AbortHandle,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("targets", &self.targets.len())
            .field("servers", &self.servers.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        targets: Vec<TargetSpec>,
        servers: Vec<Server>,
        settings: BuildSettings,
        passwords: Arc<dyn PasswordProvider>,
    ) -> Self {
        Self {
            targets,
            servers,
            factory: Arc::new(SessionFactory::new(settings.clone())),
            settings,
            credentials: Arc::new(CredentialCache::new(passwords)),
            sink: Arc::new(ConsoleSink),
            resources: Arc::new(MapReportExtractor),
            skip: None,
            purge: None,
            abort: AbortHandle::default(),
        }
    }

    pub fn with_channel_factory(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_resource_reporter(mut self, reporter: Arc<dyn ResourceReporter>) -> Self {
        self.resources = reporter;
        self
    }

    pub fn with_skip_callback(mut self, callback: SkipCallback) -> Self {
        self.skip = Some(callback);
        self
    }

    pub fn with_purge_callback(mut self, callback: PurgeCallback) -> Self {
        self.purge = Some(callback);
        self
    }

    pub fn targets(&self) -> &[TargetSpec] {
        &self.targets
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Server of each target, in target order.
    pub fn assignments(&self) -> Vec<Option<Server>> {
        assign_servers(&self.targets, &self.servers)
    }

    /// Build every target concurrently and aggregate the outcomes.
    pub async fn synthesize_all(&self, options: SynthesizeOptions) -> SynthesisResult {
        let run_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        self.abort.reset();
        obs::emit_build_started(&run_id, self.targets.len(), self.servers.len());

        let skipped: HashSet<String> = self
            .skip
            .as_ref()
            .map(|cb| cb(&self.targets))
            .unwrap_or_default()
            .into_iter()
            .collect();
        let purges = self
            .purge
            .as_ref()
            .map(|cb| cb(&self.targets))
            .unwrap_or_default();

        let count = self.targets.len();
        let mut slots: Vec<Option<TargetReport>> = vec![None; count];
        let mut finished: Vec<Option<BuildTarget>> = (0..count).map(|_| None).collect();
        let mut workers = JoinSet::new();

        for (index, (spec, server)) in self.targets.iter().zip(self.assignments()).enumerate() {
            let key = server.as_ref().map(Server::key);
            if skipped.contains(&spec.id) || spec.should_skip() {
                info!(target_id = %spec.id, by_caller = skipped.contains(&spec.id), "target skipped");
                self.sink.line(&spec.id, "Skipped");
                slots[index] = Some(TargetReport::early(spec.id.clone(), key, Outcome::Skipped));
                continue;
            }

            let channel = self.factory.channel(spec, server.as_ref());
            let target = BuildTarget::new(
                spec.clone(),
                server,
                channel,
                self.settings.clone(),
                Arc::clone(&self.sink),
            );
            let credentials = Arc::clone(&self.credentials);
            let purge = purges.get(&spec.id).cloned();
            let id = spec.id.clone();
            let span = obs::target_span(&run_id, &spec.id);

            workers.spawn(
                async move {
                    let run = run_target(target, credentials, options, purge);
                    match AssertUnwindSafe(run).catch_unwind().await {
                        Ok((report, target)) => (index, report, Some(target)),
                        Err(panic) => {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            error!(target_id = %id, panic = %message, "worker panicked");
                            let report =
                                TargetReport::early(id, key, Outcome::UnspecifiedInternalError);
                            (index, report, None)
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut aborted = false;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok((index, report, target))) => {
                        slots[index] = Some(report);
                        finished[index] = target;
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => error!(error = %e, "worker task failed"),
                },
                _ = self.abort.aborted(), if !aborted => {
                    warn!(run_id = %run_id, "abort requested");
                    workers.abort_all();
                    aborted = true;
                }
            }
        }

        let targets: Vec<TargetReport> = slots
            .into_iter()
            .zip(&self.targets)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    let outcome = if aborted {
                        Outcome::UserAborted
                    } else {
                        Outcome::UnspecifiedInternalError
                    };
                    self.sink.line(&spec.id, &format!("Build ended: {outcome}"));
                    TargetReport::early(spec.id.clone(), None, outcome)
                })
            })
            .collect();

        let mut resource_reports = Vec::new();
        for (report, target) in targets.iter().zip(&finished) {
            let Some(target) = target.as_ref().filter(|_| report.outcome.is_ok()) else {
                continue;
            };
            let _span = obs::TargetSpan::enter(&run_id, &report.target);
            match target.compile_resource_report(self.resources.as_ref()) {
                Ok(Some(path)) => resource_reports.push(path),
                Ok(None) => {}
                Err(e) => warn!(target_id = %report.target, error = %e, "resource report failed"),
            }
        }

        let verdict = BuildGate::evaluate(&targets);
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_build_finished(&run_id, verdict.outcome.label(), duration_ms);
        info!(run_id = %run_id, "{}", verdict.message);

        SynthesisResult {
            run_id,
            verdict,
            targets,
            resource_reports,
            duration_ms,
        }
    }
}

/// One worker: login, optional clean, hardware, software, download, logout.
async fn run_target(
    mut target: BuildTarget,
    credentials: Arc<CredentialCache>,
    options: SynthesizeOptions,
    purge: Option<Vec<String>>,
) -> (TargetReport, BuildTarget) {
    let start = Instant::now();
    let server = target.server().cloned();
    let mut report = TargetReport::early(target.id(), server.as_ref().map(Server::key), Outcome::Ok);

    report.outcome = prepare(&mut target, &credentials, server.as_ref(), &options, purge).await;
    if report.outcome.is_ok() {
        if options.hardware {
            report.hardware = Some(target.run_hardware_pipeline(options.force_clean).await);
        }
        if options.software {
            report.software = Some(target.run_software_pipeline(options.force_clean).await);
        }
        if options.download {
            target.download_outputs().await;
        }
        report.outcome = target.outcome();
    }
    target.logout().await;

    report.duration_ms = start.elapsed().as_millis() as u64;
    obs::emit_target_finished(target.id(), report.outcome.label(), report.duration_ms);
    (report, target)
}

/// Readiness checks, login and selective purge.
async fn prepare(
    target: &mut BuildTarget,
    credentials: &CredentialCache,
    server: Option<&Server>,
    options: &SynthesizeOptions,
    purge: Option<Vec<String>>,
) -> Outcome {
    for group in options.groups() {
        let readiness = target.check_readiness(group);
        if !readiness.is_ready() {
            for missing in &readiness.missing {
                target.reporter().note(&format!("Not ready: {missing}"));
            }
            return Outcome::NotReady;
        }
    }

    let creds = match server.filter(|_| target.spec().is_remote()) {
        Some(server) => match credentials.credentials_for(server).await {
            Ok(creds) => Some(creds),
            Err(e) => {
                warn!(target_id = %target.id(), error = %e, "no password");
                return Outcome::AuthenticationFailed;
            }
        },
        None => None,
    };

    let login = target.login(creds.as_ref()).await;
    if login == Outcome::AuthenticationFailed {
        if let Some(server) = server {
            credentials.invalidate(server).await;
        }
    }
    if login.is_failure() {
        return login;
    }

    match purge {
        Some(cores) => target.purge_outputs(&PurgeScope::Selective(cores)).await,
        None => Outcome::Ok,
    }
}
