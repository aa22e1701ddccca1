//! The single "run external build tool" primitive every stage is built from.

use std::time::Instant;

use fpgabuild_core::{
    obs, SessionChannel, Subdir, TargetLayout, TargetSpec, ToolInvocation,
};
use tracing::{debug, info};

use crate::error::{StageError, StageOutcome};
use crate::progress::StageReporter;
use crate::settings::BuildSettings;
use crate::stage::Stage;

/// Everything a stage needs to run on one target.
pub struct StageContext<'a> {
    pub channel: &'a mut dyn SessionChannel,
    pub spec: &'a TargetSpec,
    /// Layout on the host that runs the tools.
    pub layout: TargetLayout,
    pub settings: &'a BuildSettings,
    pub reporter: &'a StageReporter,
}

impl StageContext<'_> {
    /// Invocation of `program` for `stage`, labelled `label`, run in `workdir`.
    pub fn invocation(
        &self,
        stage: Stage,
        label: &str,
        program: &str,
        workdir: String,
    ) -> ToolInvocation {
        ToolInvocation::new(label, program, workdir, self.settings.stage_timeout(stage))
    }

    /// `name` inside `dir` on the build host.
    pub fn path_in(&self, dir: &str, name: &str) -> String {
        let sep = self.layout.style.separator();
        format!("{}{}{}", dir.trim_end_matches(['/', '\\']), sep, name)
    }

    pub fn output_file(&self, name: &str) -> String {
        self.layout.file(Subdir::Output, name)
    }
}

/// One tool invocation plus the log files it leaves in its working directory.
#[derive(Debug, Clone)]
pub struct ToolStep {
    pub invocation: ToolInvocation,
    pub logs: Vec<String>,
}

impl ToolStep {
    pub fn new(invocation: ToolInvocation) -> Self {
        Self {
            invocation,
            logs: Vec::new(),
        }
    }

    pub fn log(mut self, name: impl Into<String>) -> Self {
        self.logs.push(name.into());
        self
    }
}

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Invocation label.
    pub label: String,

    pub success: bool,

    /// Exit code, when the execution mode reports one.
    pub exit_code: Option<i32>,

    /// Captured output.
    pub output: String,

    pub duration_ms: u64,

    /// Transport error, when the tool could not be run to completion.
    pub error: Option<String>,
}

impl ToolResult {
    /// Whether this tool passed.
    pub fn passed(&self) -> bool {
        self.success && self.error.is_none()
    }
}

/// Runs build tools through a target's channel.
pub struct ToolRunner;

impl ToolRunner {
    /// Run one tool, then copy its logs into `output/` whatever the result.
    pub async fn execute(ctx: &mut StageContext<'_>, step: &ToolStep) -> ToolResult {
        let start = Instant::now();
        let inv = &step.invocation;
        debug!(target_id = %ctx.spec.id, tool = %inv.program, label = %inv.stage, "running tool");

        let (success, exit_code, output, error) = match ctx.channel.run_scripted(inv).await {
            Ok(outcome) => (outcome.success, outcome.exit_code, outcome.output, None),
            Err(e) => {
                obs::emit_channel_error(&ctx.spec.id, &inv.stage, &e);
                (false, None, String::new(), Some(e.to_string()))
            }
        };

        let mut logs = step.logs.clone();
        logs.push(inv.log_name());
        for log in logs {
            let from = ctx.path_in(&inv.workdir, &log);
            let to = ctx.output_file(&log);
            match ctx.channel.copy_file(&from, &to).await {
                Ok(out) if out.success() => {}
                Ok(out) => debug!(log = %from, stderr = %out.stderr.trim(), "log not copied"),
                Err(e) => debug!(log = %from, error = %e, "log not copied"),
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            target_id = %ctx.spec.id,
            tool = %inv.stage,
            success = success && error.is_none(),
            duration_ms,
            "tool finished"
        );
        ToolResult {
            label: inv.stage.clone(),
            success,
            exit_code,
            output,
            duration_ms,
            error,
        }
    }

    /// Run one tool and turn a failed result into a stage error.
    pub async fn run(ctx: &mut StageContext<'_>, step: ToolStep) -> StageOutcome {
        let result = Self::execute(ctx, &step).await;
        if result.passed() {
            return Ok(());
        }
        ctx.reporter
            .detail(&format!("{} failed", result.label));
        match result.error {
            Some(detail) => Err(StageError::Command {
                operation: result.label,
                detail,
            }),
            None => Err(StageError::ToolFailed { tool: result.label }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TargetLog;
    use fpgabuild_core::fakes::{ChannelCall, RecordingSink, ScriptedChannel};
    use std::sync::Arc;

    fn fixture() -> (TargetSpec, BuildSettings, StageReporter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let spec = TargetSpec::new("fpga0", dir.path());
        let reporter = StageReporter::new(
            "fpga0",
            Arc::new(RecordingSink::new()),
            TargetLog::new(dir.path(), "fpga0"),
        );
        (spec, BuildSettings::default(), reporter, dir)
    }

    #[tokio::test]
    async fn test_logs_copied_even_on_failure() {
        let (spec, settings, reporter, _dir) = fixture();
        let recorder = ScriptedChannel::local().fail_stage("par");
        let mut channel = recorder.clone();
        channel.open(None).await.unwrap();
        let layout = TargetLayout::new("/w/fpga0", fpgabuild_core::domain::PathStyle::Posix);
        let mut ctx = StageContext {
            channel: &mut channel,
            spec: &spec,
            layout,
            settings: &settings,
            reporter: &reporter,
        };

        let inv = ctx.invocation(Stage::Implement, "par", "par", "/w/fpga0/implementation".into());
        let err = ToolRunner::run(&mut ctx, ToolStep::new(inv).log("system.par"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ToolFailed { .. }));

        let copies: Vec<ChannelCall> = recorder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ChannelCall::CopyFile { .. }))
            .collect();
        assert_eq!(
            copies,
            vec![
                ChannelCall::CopyFile {
                    from: "/w/fpga0/implementation/system.par".into(),
                    to: "/w/fpga0/output/system.par".into(),
                },
                ChannelCall::CopyFile {
                    from: "/w/fpga0/implementation/par.out".into(),
                    to: "/w/fpga0/output/par.out".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_error_is_command_error() {
        let (spec, settings, reporter, _dir) = fixture();
        let mut channel = ScriptedChannel::local().error_stage("map");
        channel.open(None).await.unwrap();
        let mut ctx = StageContext {
            channel: &mut channel,
            spec: &spec,
            layout: TargetLayout::new("/w/fpga0", fpgabuild_core::domain::PathStyle::Posix),
            settings: &settings,
            reporter: &reporter,
        };
        let inv = ctx.invocation(Stage::Implement, "map", "map", "/w/fpga0/implementation".into());
        let result = ToolRunner::execute(&mut ctx, &ToolStep::new(inv)).await;
        assert!(!result.passed());
        assert!(result.error.unwrap().contains("map sentinel"));
    }
}
