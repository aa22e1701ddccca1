//! Integration tests: one target driven through its stage groups against a
//! scripted channel.

use std::path::Path;
use std::sync::Arc;

use fpgabuild_core::domain::{DiscoveryRule, SourceSet};
use fpgabuild_core::fakes::{ChannelCall, RecordingSink, ScriptedChannel};
use fpgabuild_core::session::{Sentinel, SentinelVerdict};
use fpgabuild_core::{
    HostOs, LogicCore, OsKind, Outcome, PartDescriptor, ProcessorDescriptor, ScriptBuilder,
    SoftwareApp, TargetSpec, ToolInvocation,
};
use fpgabuild_pipeline::{BuildSettings, BuildTarget, PurgeScope, Stage};

fn write_mhs(root: &Path) {
    std::fs::write(root.join("system.mhs"), "BEGIN microblaze\nEND\n").unwrap();
}

fn base_spec(root: &Path) -> TargetSpec {
    write_mhs(root);
    TargetSpec::new("fpga0", root).with_part(PartDescriptor::new("xc5vlx110t", "ff1136", "-1"))
}

fn standalone() -> ProcessorDescriptor {
    ProcessorDescriptor::new("microblaze_0", OsKind::Standalone)
        .with_console("RS232_Uart_1")
        .with_output("app.elf")
}

fn target(spec: TargetSpec, channel: &ScriptedChannel, sink: Arc<RecordingSink>) -> BuildTarget {
    BuildTarget::new(spec, None, Box::new(channel.clone()), BuildSettings::default(), sink)
}

#[tokio::test]
async fn skipped_target_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = base_spec(dir.path());
    spec.skip = true;
    let recorder = ScriptedChannel::local();
    let mut t = target(spec, &recorder, Arc::new(RecordingSink::new()));

    let hw = t.run_hardware_pipeline(true).await;
    let sw = t.run_software_pipeline(true).await;
    assert_eq!(hw.outcome, Outcome::Skipped);
    assert_eq!(sw.outcome, Outcome::Skipped);
    assert!(hw.stages.is_empty());
    assert_eq!(t.outcome(), Outcome::Skipped);
    assert_eq!(recorder.call_count(), 0);
}

#[tokio::test]
async fn missing_hardware_description_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let spec = TargetSpec::new("fpga0", dir.path())
        .with_part(PartDescriptor::new("xc5vlx110t", "ff1136", "-1"));
    let recorder = ScriptedChannel::local();
    let mut t = target(spec, &recorder, Arc::new(RecordingSink::new()));
    assert_eq!(t.run_hardware_pipeline(false).await.outcome, Outcome::Skipped);
    assert_eq!(t.outcome(), Outcome::Skipped);
    assert_eq!(recorder.call_count(), 0);
}

#[tokio::test]
async fn not_ready_target_makes_no_channel_calls() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = base_spec(dir.path());
    spec.part.package.clear();
    let recorder = ScriptedChannel::local();
    let sink = Arc::new(RecordingSink::new());
    let mut t = target(spec, &recorder, sink.clone());

    let report = t.run_hardware_pipeline(true).await;
    assert_eq!(report.outcome, Outcome::NotReady);
    assert_eq!(t.outcome(), Outcome::NotReady);
    assert_eq!(recorder.call_count(), 0);
    assert_eq!(
        sink.lines_for("fpga0"),
        vec!["Not ready: part.package: device package is empty"]
    );
}

#[tokio::test]
async fn hardware_stops_at_first_failed_stage() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec(dir.path()).with_processor(standalone());
    let recorder = ScriptedChannel::local().fail_stage("ngdbuild");
    let sink = Arc::new(RecordingSink::new());
    let mut t = target(spec, &recorder, sink.clone());

    assert_eq!(t.login(None).await, Outcome::Ok);
    let report = t.run_hardware_pipeline(false).await;

    assert_eq!(report.outcome, Outcome::ImplementFailed);
    assert_eq!(t.outcome(), Outcome::ImplementFailed);
    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(
        recorder.scripted_stages(),
        vec!["platgen", "xst_system", "ngcbuild", "ngdbuild"]
    );
    assert_eq!(
        sink.lines_for("fpga0"),
        vec![
            "Generate...",
            "Generate...Complete!",
            "Synthesize...",
            "Synthesize...Complete!",
            "Implement...",
            "Implement...ERROR!",
        ]
    );
}

#[tokio::test]
async fn full_hardware_run_publishes_bitstreams() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec(dir.path())
        .with_core(LogicCore::new("timer_0", "xps_timer"))
        .with_processor(standalone());
    let recorder = ScriptedChannel::local();
    let mut t = target(spec, &recorder, Arc::new(RecordingSink::new()));
    t.login(None).await;

    let report = t.run_hardware_pipeline(false).await;
    assert_eq!(report.outcome, Outcome::Ok);
    assert_eq!(
        report.stages.iter().map(|s| s.stage).collect::<Vec<_>>(),
        Stage::HARDWARE.to_vec()
    );
    assert_eq!(
        recorder.scripted_stages(),
        vec![
            "platgen",
            "xst_timer_0",
            "xst_system",
            "ngcbuild",
            "ngdbuild",
            "map",
            "par",
            "bitgen",
            "codelet_microblaze_0",
            "data2mem",
        ]
    );
    let root = t.layout().root;
    let published = format!("{root}/output/fpga0.bit");
    assert!(recorder
        .calls()
        .iter()
        .any(|c| matches!(c, ChannelCall::CopyFile { to, .. } if *to == published)));
}

#[tokio::test]
async fn failed_par_check_only_warns() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec(dir.path());
    let recorder = ScriptedChannel::local().fail_command("grep -q");
    let sink = Arc::new(RecordingSink::new());
    let mut t = target(spec, &recorder, sink.clone());
    t.login(None).await;

    let report = t.run_hardware_pipeline(false).await;
    assert_eq!(report.outcome, Outcome::Ok);
    assert!(sink
        .lines_for("fpga0")
        .contains(&"Warning: timing constraints were not all met".to_string()));
}

#[tokio::test]
async fn software_group_regenerates_mss_and_compiles() {
    let dir = tempfile::tempdir().unwrap();
    let app = SoftwareApp::new("hello")
        .with_sources(SourceSet::default().with_rule(DiscoveryRule::new("src", "*.c")));
    let spec = base_spec(dir.path()).with_processor(standalone().with_app(app));
    let src = format!("{}/src", dir.path().to_string_lossy());
    let recorder = ScriptedChannel::local().with_listing(&src, ["main.c", "README"]);
    let mut t = target(spec, &recorder, Arc::new(RecordingSink::new()));
    t.login(None).await;

    let report = t.run_software_pipeline(false).await;
    assert_eq!(report.outcome, Outcome::Ok);
    assert_eq!(recorder.scripted_stages(), vec!["libgen", "compile_hello"]);

    let mss = std::fs::read_to_string(dir.path().join("system.mss")).unwrap();
    assert!(mss.contains("PARAMETER PROC_INSTANCE = microblaze_0"));
    assert!(mss.contains("PARAMETER STDOUT = RS232_Uart_1"));
}

#[tokio::test]
async fn software_failure_recorded_after_clean_hardware() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec(dir.path()).with_processor(standalone());
    let recorder = ScriptedChannel::local().fail_stage("libgen");
    let mut t = target(spec, &recorder, Arc::new(RecordingSink::new()));
    t.login(None).await;

    assert_eq!(t.run_hardware_pipeline(false).await.outcome, Outcome::Ok);
    assert_eq!(t.run_software_pipeline(false).await.outcome, Outcome::LibGenFailed);
    assert_eq!(t.outcome(), Outcome::LibGenFailed);
}

#[tokio::test]
async fn selective_purge_only_removes_opted_in_core_files() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec(dir.path())
        .with_core(LogicCore::new("core_a", "xps_timer").with_purge(true))
        .with_core(LogicCore::new("core_b", "xps_uartlite"));
    let root = dir.path().to_string_lossy().to_string();
    let recorder = ScriptedChannel::local()
        .with_listing(
            &format!("{root}/synthesis"),
            ["core_a_wrapper.ngc", "core_b_wrapper.ngc", "system.ngc"],
        )
        .with_listing(&format!("{root}/hdl"), ["core_a_wrapper.vhd", "system.vhd"]);
    let mut t = target(spec, &recorder, Arc::new(RecordingSink::new()));

    let outcome = t.purge_outputs(&PurgeScope::Selective(Vec::new())).await;
    assert_eq!(outcome, Outcome::Ok);
    assert_eq!(
        recorder.removed_paths(),
        vec![
            format!("{root}/hdl/core_a_wrapper.vhd"),
            format!("{root}/synthesis/core_a_wrapper.ngc"),
        ]
    );
}

#[tokio::test]
async fn selective_purge_keeps_shared_outputs_for_unknown_names() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec(dir.path()).with_core(LogicCore::new("core_a", "xps_timer"));
    let root = dir.path().to_string_lossy().to_string();
    let recorder = ScriptedChannel::local().with_listing(
        &format!("{root}/synthesis"),
        ["core_a_wrapper.ngc", "system.ngc", "system_xst.scr"],
    );
    let sink = Arc::new(RecordingSink::new());
    let mut t = target(spec, &recorder, sink.clone());

    let outcome = t
        .purge_outputs(&PurgeScope::Selective(vec!["system".to_string()]))
        .await;
    assert_eq!(outcome, Outcome::Ok);
    assert!(recorder.removed_paths().is_empty());
    assert_eq!(sink.lines_for("fpga0"), vec!["Not a core: system"]);

    let outcome = t
        .purge_outputs(&PurgeScope::Selective(vec![
            "system".to_string(),
            "core_a".to_string(),
        ]))
        .await;
    assert_eq!(outcome, Outcome::Ok);
    assert_eq!(
        recorder.removed_paths(),
        vec![format!("{root}/synthesis/core_a_wrapper.ngc")]
    );
}

#[tokio::test]
async fn force_clean_purges_before_first_stage() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec(dir.path());
    let recorder = ScriptedChannel::local();
    let mut t = target(spec, &recorder, Arc::new(RecordingSink::new()));
    t.login(None).await;
    let before = recorder.call_count();

    t.run_hardware_pipeline(true).await;
    let calls = recorder.calls();
    assert!(matches!(calls[before], ChannelCall::RemovePaths(_)));
    assert!(matches!(calls[before + 1], ChannelCall::MakeDirs(_)));
    assert!(matches!(calls[before + 2], ChannelCall::Scripted { .. }));
}

#[test]
fn generated_scripts_are_byte_identical() {
    let inv = ToolInvocation::new(
        "par",
        "par",
        "/home/synth/fpga0/implementation",
        std::time::Duration::from_secs(60),
    )
    .args(["-w", "-ol", "high", "system_map.ncd", "system.ncd", "system.pcf"]);
    for os in [HostOs::Linux, HostOs::Windows] {
        let builder = ScriptBuilder::for_host(os);
        let sentinel = Sentinel::new("par");
        let a = builder.render(&inv, &sentinel);
        let b = builder.render(&inv, &Sentinel::new("par"));
        assert_eq!(a.text, b.text);
        assert_eq!(a.digest, b.digest);
    }
}

#[test]
fn error_sentinel_wins_over_success() {
    let sentinel = Sentinel::new("map");
    let both = format!("{}\n{}\n", sentinel.success_line(), sentinel.error_line());
    assert_eq!(sentinel.classify(&both), SentinelVerdict::Failure);
    let noisy = format!("WARNING: slow\n{}\n", sentinel.error_line());
    assert_eq!(sentinel.classify(&noisy), SentinelVerdict::Failure);
    assert_eq!(
        sentinel.classify(&format!("{}\n", sentinel.success_line())),
        SentinelVerdict::Success
    );
}
