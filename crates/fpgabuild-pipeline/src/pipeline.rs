//! Stage group execution.

use std::time::Instant;

use fpgabuild_core::Outcome;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StageOutcome;
use crate::runner::StageContext;
use crate::stage::{Stage, StageGroup};
use crate::{hardware, software};

/// Record of one stage that ran.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,

    pub success: bool,

    pub duration_ms: u64,

    /// Error message, when the stage failed.
    pub error: Option<String>,
}

/// Result of a complete stage group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: StageGroup,

    /// `Ok`, or the failure of the first stage that failed.
    pub outcome: Outcome,

    /// Stages that ran, in order. Stages after a failure are absent.
    pub stages: Vec<StageRecord>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl GroupReport {
    /// A group that never started, e.g. because readiness failed.
    pub fn not_run(group: StageGroup, outcome: Outcome) -> Self {
        Self {
            group,
            outcome,
            stages: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.success).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.success).count()
    }
}

/// Stage group orchestrator.
pub struct StagePipeline;

impl StagePipeline {
    /// Stages of `group` that have work on this target, in order.
    pub fn plan(ctx: &StageContext<'_>, group: StageGroup) -> Vec<Stage> {
        let stages: &[Stage] = match group {
            StageGroup::Hardware => &Stage::HARDWARE,
            StageGroup::Software => &Stage::SOFTWARE,
        };
        stages
            .iter()
            .copied()
            .filter(|s| s.applies_to(ctx.spec))
            .collect()
    }

    pub async fn dispatch(ctx: &mut StageContext<'_>, stage: Stage) -> StageOutcome {
        match stage {
            Stage::Generate => hardware::generate(ctx).await,
            Stage::SynthesizeCore => hardware::synthesize(ctx).await,
            Stage::Implement => hardware::implement(ctx).await,
            Stage::Bitstream => hardware::bitstream(ctx).await,
            Stage::CodeletCompile => hardware::codelet_compile(ctx).await,
            Stage::CodeletMerge => hardware::codelet_merge(ctx).await,
            Stage::SoftwarePrepare => software::prepare(ctx).await,
            Stage::LibGen => software::lib_gen(ctx).await,
            Stage::DeviceTreeUpdate => software::device_tree_update(ctx).await,
            Stage::Compile => software::compile(ctx).await,
        }
    }

    /// Run a stage group, stopping at the first failed stage.
    ///
    /// Every stage reports its start and its completion or error. The first
    /// failure becomes the group's outcome.
    pub async fn run_group(ctx: &mut StageContext<'_>, group: StageGroup) -> GroupReport {
        let start = Instant::now();
        let target = ctx.spec.id.clone();
        let mut report = GroupReport::not_run(group, Outcome::Ok);

        for stage in Self::plan(ctx, group) {
            let since = ctx.reporter.stage_started(stage);
            let result = Self::dispatch(ctx, stage).await;
            let success = result.is_ok();
            ctx.reporter.stage_finished(stage, since, success);

            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(target_id = %target, stage = %stage, error = %e, "stage failed");
                    ctx.reporter.detail(&format!("{}: {e}", stage.title()));
                    Some(e.to_string())
                }
            };
            report.stages.push(StageRecord {
                stage,
                success,
                duration_ms: since.elapsed().as_millis() as u64,
                error,
            });
            if !success {
                report.outcome = stage.failure();
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            target_id = %target,
            group = ?group,
            outcome = %report.outcome,
            stages = report.stages.len(),
            duration_ms = report.duration_ms,
            "stage group finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stage: Stage, success: bool) -> StageRecord {
        StageRecord {
            stage,
            success,
            duration_ms: 10,
            error: (!success).then(|| "failed".to_string()),
        }
    }

    #[test]
    fn test_group_report_counts() {
        let report = GroupReport {
            group: StageGroup::Hardware,
            outcome: Outcome::ImplementFailed,
            stages: vec![
                record(Stage::Generate, true),
                record(Stage::SynthesizeCore, true),
                record(Stage::Implement, false),
            ],
            duration_ms: 30,
        };
        assert_eq!(report.passed_count(), 2);
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_not_run_has_no_stages() {
        let report = GroupReport::not_run(StageGroup::Software, Outcome::NotReady);
        assert!(report.stages.is_empty());
        assert_eq!(report.outcome, Outcome::NotReady);
    }
}
