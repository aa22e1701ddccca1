//! Dry runs: the scripts a stage would upload, rendered without a build host.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fpgabuild_core::session::Sentinel;
use fpgabuild_core::{
    ChannelResult, CommandOutput, Credentials, ExecutionMode, HostOs, NullSink, ScriptBuilder,
    ScriptOutcome, SessionChannel, StageScript, TargetSpec, ToolInvocation, TransferDirection,
};

use crate::error::StageError;
use crate::pipeline::StagePipeline;
use crate::progress::{StageReporter, TargetLog};
use crate::runner::StageContext;
use crate::settings::BuildSettings;
use crate::stage::Stage;

/// Remote channel that records tool invocations and reports success for
/// everything. Directory listings are empty and downloads leave no file.
#[derive(Debug)]
pub struct DryRunChannel {
    os: HostOs,
    invocations: Vec<ToolInvocation>,
}

impl DryRunChannel {
    pub fn new(os: HostOs) -> Self {
        Self {
            os,
            invocations: Vec::new(),
        }
    }

    pub fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }
}

#[async_trait]
impl SessionChannel for DryRunChannel {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Remote
    }

    fn host_os(&self) -> HostOs {
        self.os
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn open(&mut self, _credentials: Option<&Credentials>) -> ChannelResult<()> {
        Ok(())
    }

    async fn run_one_shot(&mut self, _command: &str) -> ChannelResult<CommandOutput> {
        Ok(CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }

    async fn run_scripted(&mut self, invocation: &ToolInvocation) -> ChannelResult<ScriptOutcome> {
        self.invocations.push(invocation.clone());
        Ok(ScriptOutcome {
            success: true,
            exit_code: None,
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

/// Scripts `stage` would run for `spec` on a host running `os`, in order.
pub async fn preview_stage(
    spec: &TargetSpec,
    os: HostOs,
    settings: &BuildSettings,
    stage: Stage,
) -> Result<Vec<StageScript>, StageError> {
    let mut channel = DryRunChannel::new(os);
    let reporter = StageReporter::new(
        spec.id.clone(),
        Arc::new(NullSink),
        TargetLog::new(&std::env::temp_dir(), &spec.id),
    );
    let mut ctx = StageContext {
        channel: &mut channel,
        spec,
        layout: spec.exec_layout(os),
        settings,
        reporter: &reporter,
    };
    StagePipeline::dispatch(&mut ctx, stage).await?;

    let builder = ScriptBuilder::for_host(os);
    Ok(channel
        .invocations()
        .iter()
        .map(|inv| builder.render(inv, &Sentinel::new(&inv.stage)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpgabuild_core::{LogicCore, PartDescriptor};

    fn spec() -> TargetSpec {
        TargetSpec::new("fpga0", "/tmp/fpga0")
            .remote("/home/synth/fpga0")
            .with_part(PartDescriptor::new("xc5vlx110t", "ff1136", "-1"))
            .with_core(LogicCore::new("timer_0", "xps_timer"))
    }

    #[tokio::test]
    async fn test_synthesis_preview_lists_every_xst_run() {
        let scripts = preview_stage(&spec(), HostOs::Linux, &BuildSettings::default(), Stage::SynthesizeCore)
            .await
            .unwrap();
        let names: Vec<&str> = scripts.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["xst_timer_0.sh", "xst_system.sh", "ngcbuild.sh"]);
        assert!(scripts[0].text.contains("xst -ifn timer_0_wrapper_xst.scr"));
    }

    #[tokio::test]
    async fn test_preview_is_deterministic() {
        let settings = BuildSettings::default();
        let a = preview_stage(&spec(), HostOs::Windows, &settings, Stage::Implement)
            .await
            .unwrap();
        let b = preview_stage(&spec(), HostOs::Windows, &settings, Stage::Implement)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|s| s.file_name.ends_with(".bat")));
    }
}
