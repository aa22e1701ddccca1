//! Coordinator tests: several targets built concurrently over scripted
//! channels.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fpgabuild_core::fakes::{ChannelCall, RecordingSink, ScriptedChannel, StaticPasswordProvider};
use fpgabuild_core::{
    ChannelResult, CommandOutput, Credentials, ExecutionMode, HostOs, LogicCore, Outcome,
    PartDescriptor, ScriptOutcome, Server, SessionChannel, TargetSpec, ToolInvocation, TransferDirection,
};
use fpgabuild_pipeline::{
    BuildSettings, ChannelFactory, Coordinator, ResourceReporter, SynthesizeOptions,
};

/// Hands out pre-built scripted channels by target id.
#[derive(Default)]
struct ScriptedFactory {
    channels: Mutex<HashMap<String, ScriptedChannel>>,
}

impl ScriptedFactory {
    fn with(self, id: &str, channel: ScriptedChannel) -> Self {
        self.channels
            .lock()
            .unwrap()
            .insert(id.to_string(), channel);
        self
    }
}

impl ChannelFactory for ScriptedFactory {
    fn channel(&self, spec: &TargetSpec, _server: Option<&Server>) -> Box<dyn SessionChannel> {
        let channel = self
            .channels
            .lock()
            .unwrap()
            .get(&spec.id)
            .cloned()
            .unwrap_or_else(ScriptedChannel::local);
        Box::new(channel)
    }
}

/// Records which targets had a resource report compiled.
#[derive(Default)]
struct RecordingReporter {
    targets: Mutex<Vec<String>>,
}

impl ResourceReporter for RecordingReporter {
    fn compile(&self, spec: &TargetSpec) -> io::Result<Option<PathBuf>> {
        self.targets.lock().unwrap().push(spec.id.clone());
        Ok(None)
    }
}

/// Local channel whose login panics.
struct PanickingChannel;

#[async_trait]
impl SessionChannel for PanickingChannel {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    fn host_os(&self) -> HostOs {
        HostOs::Linux
    }

    fn is_open(&self) -> bool {
        false
    }

    async fn open(&mut self, _credentials: Option<&Credentials>) -> ChannelResult<()> {
        panic!("channel exploded");
    }

    async fn run_one_shot(&mut self, _command: &str) -> ChannelResult<CommandOutput> {
        Ok(CommandOutput::default())
    }

    async fn run_scripted(&mut self, _invocation: &ToolInvocation) -> ChannelResult<ScriptOutcome> {
        Ok(ScriptOutcome {
            success: true,
            exit_code: Some(0),
            output: String::new(),
            script_digest: None,
        })
    }

    async fn transfer(
        &mut self,
        _direction: TransferDirection,
        _local: &Path,
        _remote: &str,
    ) -> ChannelResult<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

struct PanickingFactory;

impl ChannelFactory for PanickingFactory {
    fn channel(&self, _spec: &TargetSpec, _server: Option<&Server>) -> Box<dyn SessionChannel> {
        Box::new(PanickingChannel)
    }
}

fn local_target(root: &Path, id: &str) -> TargetSpec {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("system.mhs"), "BEGIN microblaze\nEND\n").unwrap();
    TargetSpec::new(id, &dir).with_part(PartDescriptor::new("xc5vlx110t", "ff1136", "-1"))
}

fn remote_target(root: &Path, id: &str) -> TargetSpec {
    local_target(root, id).remote(format!("/home/synth/{id}"))
}

fn hardware_only() -> SynthesizeOptions {
    SynthesizeOptions {
        software: false,
        download: false,
        ..SynthesizeOptions::default()
    }
}

fn coordinator(targets: Vec<TargetSpec>, servers: Vec<Server>) -> Coordinator {
    Coordinator::new(
        targets,
        servers,
        BuildSettings::default(),
        Arc::new(StaticPasswordProvider::new("pw")),
    )
}

#[tokio::test]
async fn shared_server_prompts_once_and_builds_every_target() {
    let dir = tempfile::tempdir().unwrap();
    let ids = ["fpga0", "fpga1", "fpga2"];
    let channels: Vec<ScriptedChannel> = ids
        .iter()
        .map(|_| ScriptedChannel::remote(HostOs::Linux))
        .collect();
    let factory = ids
        .iter()
        .zip(&channels)
        .fold(ScriptedFactory::default(), |f, (id, ch)| f.with(id, ch.clone()));
    let passwords = Arc::new(StaticPasswordProvider::new("pw"));
    let targets = ids.iter().map(|id| remote_target(dir.path(), id)).collect();

    let coordinator = Coordinator::new(
        targets,
        vec![Server::new("synth1", "builder")],
        BuildSettings::default(),
        passwords.clone(),
    )
    .with_channel_factory(Arc::new(factory))
    .with_progress_sink(Arc::new(RecordingSink::new()));

    let result = coordinator.synthesize_all(hardware_only()).await;

    assert!(result.verdict.passed, "{:?}", result.verdict);
    assert_eq!(passwords.prompts(), 1);
    let expected = channels[0].scripted_stages();
    assert!(expected.contains(&"bitgen".to_string()));
    for (channel, report) in channels.iter().zip(&result.targets) {
        assert_eq!(report.outcome, Outcome::Ok);
        assert_eq!(report.server.as_deref(), Some("builder@synth1:22"));
        assert_eq!(channel.scripted_stages(), expected);
        assert_eq!(
            channel.calls()[0],
            ChannelCall::Open {
                password: Some("pw".to_string())
            }
        );
        assert_eq!(channel.calls().last(), Some(&ChannelCall::Close));
    }
}

#[tokio::test]
async fn aggregate_outcome_is_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let targets = ["fpga0", "fpga1", "fpga2"]
        .iter()
        .map(|id| local_target(dir.path(), id))
        .collect();
    let factory = ScriptedFactory::default().with("fpga1", ScriptedChannel::local().fail_stage("bitgen"));
    let reporter = Arc::new(RecordingReporter::default());

    let result = coordinator(targets, Vec::new())
        .with_channel_factory(Arc::new(factory))
        .with_progress_sink(Arc::new(RecordingSink::new()))
        .with_resource_reporter(reporter.clone())
        .synthesize_all(SynthesizeOptions::default())
        .await;

    assert!(!result.verdict.passed);
    assert_eq!(result.outcome(), Outcome::BitstreamFailed);
    assert_eq!(result.verdict.violations, vec!["fpga1: bitstream_failed"]);
    let outcomes: Vec<Outcome> = result.targets.iter().map(|t| t.outcome).collect();
    assert_eq!(
        outcomes,
        vec![Outcome::Ok, Outcome::BitstreamFailed, Outcome::Ok]
    );

    let mut reported = reporter.targets.lock().unwrap().clone();
    reported.sort();
    assert_eq!(reported, vec!["fpga0", "fpga2"]);
}

#[tokio::test]
async fn abort_ends_outstanding_targets() {
    let dir = tempfile::tempdir().unwrap();
    let ids = ["fpga0", "fpga1", "fpga2"];
    let factory = ids.iter().fold(ScriptedFactory::default(), |f, id| {
        f.with(id, ScriptedChannel::local().with_delay(Duration::from_secs(10)))
    });
    let targets = ids.iter().map(|id| local_target(dir.path(), id)).collect();
    let sink = Arc::new(RecordingSink::new());
    let coordinator = coordinator(targets, Vec::new())
        .with_channel_factory(Arc::new(factory))
        .with_progress_sink(sink.clone());

    let handle = coordinator.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
    });

    let result = coordinator.synthesize_all(SynthesizeOptions::default()).await;
    assert!(result
        .targets
        .iter()
        .all(|t| t.outcome == Outcome::UserAborted));
    assert_eq!(result.outcome(), Outcome::UserAborted);
    assert!(sink
        .lines_for("fpga1")
        .contains(&"Build ended: user_aborted".to_string()));
}

#[tokio::test]
async fn run_after_abort_builds_normally() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(vec![local_target(dir.path(), "fpga0")], Vec::new())
        .with_channel_factory(Arc::new(ScriptedFactory::default()))
        .with_progress_sink(Arc::new(RecordingSink::new()));

    coordinator.abort_handle().abort();
    let result = coordinator.synthesize_all(hardware_only()).await;

    assert_eq!(result.targets[0].outcome, Outcome::Ok);
    assert!(result.verdict.passed);
    assert!(!coordinator.abort_handle().is_aborted());
}

#[tokio::test]
async fn rejected_login_clears_cached_password() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new("synth1", "builder");
    let factory = ScriptedFactory::default().with(
        "fpga0",
        ScriptedChannel::remote(HostOs::Linux).reject_login(),
    );
    let coordinator = coordinator(vec![remote_target(dir.path(), "fpga0")], vec![server.clone()])
        .with_channel_factory(Arc::new(factory))
        .with_progress_sink(Arc::new(RecordingSink::new()));

    let result = coordinator.synthesize_all(hardware_only()).await;
    assert_eq!(result.targets[0].outcome, Outcome::AuthenticationFailed);
    assert!(result.targets[0].hardware.is_none());
    assert!(!coordinator.credentials().is_cached(&server).await);
}

#[tokio::test]
async fn skip_callback_excludes_targets() {
    let dir = tempfile::tempdir().unwrap();
    let skipped = ScriptedChannel::local();
    let factory = ScriptedFactory::default().with("fpga1", skipped.clone());
    let targets = vec![local_target(dir.path(), "fpga0"), local_target(dir.path(), "fpga1")];
    let sink = Arc::new(RecordingSink::new());

    let result = coordinator(targets, Vec::new())
        .with_channel_factory(Arc::new(factory))
        .with_progress_sink(sink.clone())
        .with_skip_callback(Arc::new(|_| vec!["fpga1".to_string()]))
        .synthesize_all(SynthesizeOptions::default())
        .await;

    assert!(result.verdict.passed);
    assert_eq!(result.targets[0].outcome, Outcome::Ok);
    assert_eq!(result.targets[1].outcome, Outcome::Skipped);
    assert_eq!(result.verdict.message, "1 target(s) built, 1 skipped");
    assert_eq!(skipped.call_count(), 0);
    assert_eq!(sink.lines_for("fpga1"), vec!["Skipped"]);
}

#[tokio::test]
async fn unbuildable_targets_get_no_worker() {
    let dir = tempfile::tempdir().unwrap();
    let mut disabled = local_target(dir.path(), "fpga0");
    disabled.enabled = false;
    let no_hdl = TargetSpec::new("fpga1", dir.path().join("empty"));
    let disabled_channel = ScriptedChannel::local();
    let no_hdl_channel = ScriptedChannel::local();
    let factory = ScriptedFactory::default()
        .with("fpga0", disabled_channel.clone())
        .with("fpga1", no_hdl_channel.clone());
    let sink = Arc::new(RecordingSink::new());

    let result = coordinator(vec![disabled, no_hdl], Vec::new())
        .with_channel_factory(Arc::new(factory))
        .with_progress_sink(sink.clone())
        .synthesize_all(SynthesizeOptions::default())
        .await;

    assert!(result.targets.iter().all(|t| t.outcome == Outcome::Skipped));
    assert!(result.targets.iter().all(|t| t.hardware.is_none()));
    assert_eq!(disabled_channel.call_count(), 0);
    assert_eq!(no_hdl_channel.call_count(), 0);
    assert_eq!(sink.lines_for("fpga0"), vec!["Skipped"]);
    assert_eq!(sink.lines_for("fpga1"), vec!["Skipped"]);
}

#[tokio::test]
async fn purge_callback_runs_before_build() {
    let dir = tempfile::tempdir().unwrap();
    let channel = ScriptedChannel::local();
    let factory = ScriptedFactory::default().with("fpga0", channel.clone());
    let spec = local_target(dir.path(), "fpga0")
        .with_core(LogicCore::new("timer_0", "xps_timer"));
    let root = spec.local_root.to_string_lossy().to_string();
    let channel = channel.with_listing(&format!("{root}/synthesis"), ["timer_0_wrapper.ngc"]);

    let result = coordinator(vec![spec], Vec::new())
        .with_channel_factory(Arc::new(factory))
        .with_progress_sink(Arc::new(RecordingSink::new()))
        .with_purge_callback(Arc::new(|targets| {
            targets
                .iter()
                .map(|t| (t.id.clone(), vec!["timer_0".to_string()]))
                .collect()
        }))
        .synthesize_all(hardware_only())
        .await;

    assert!(result.verdict.passed);
    assert_eq!(
        channel.removed_paths(),
        vec![format!("{root}/synthesis/timer_0_wrapper.ngc")]
    );
    let first_script = channel
        .calls()
        .iter()
        .position(|c| matches!(c, ChannelCall::Scripted { .. }))
        .unwrap();
    let removal = channel
        .calls()
        .iter()
        .position(|c| matches!(c, ChannelCall::RemovePaths(_)))
        .unwrap();
    assert!(removal < first_script);
}

#[tokio::test]
async fn panicking_worker_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = coordinator(vec![local_target(dir.path(), "fpga0")], Vec::new())
        .with_channel_factory(Arc::new(PanickingFactory))
        .with_progress_sink(Arc::new(RecordingSink::new()))
        .synthesize_all(SynthesizeOptions::default())
        .await;

    assert_eq!(result.targets[0].outcome, Outcome::UnspecifiedInternalError);
    assert!(!result.verdict.passed);
}
