//! Aggregate verdict over every target of a run.

use fpgabuild_core::Outcome;
use serde::{Deserialize, Serialize};

use crate::pipeline::GroupReport;

/// Final record of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,

    /// Server key (`user@address:port`) for remote targets.
    pub server: Option<String>,

    pub outcome: Outcome,

    pub hardware: Option<GroupReport>,

    pub software: Option<GroupReport>,

    pub duration_ms: u64,
}

impl TargetReport {
    /// A target that ended before any stage group ran.
    pub fn early(target: impl Into<String>, server: Option<String>, outcome: Outcome) -> Self {
        Self {
            target: target.into(),
            server,
            outcome,
            hardware: None,
            software: None,
            duration_ms: 0,
        }
    }
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether every non-skipped target ended `Ok`.
    pub passed: bool,

    /// The first failure in target order, or `Ok`.
    pub outcome: Outcome,

    /// `<target>: <outcome>` for each failed target.
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Build gate rules.
pub struct BuildGate;

impl BuildGate {
    /// Evaluate a run.
    ///
    /// Skipped targets neither pass nor fail the gate. The aggregate outcome
    /// is the first failure in target order, so a run where two targets are
    /// `Ok` and one is `BitstreamFailed` yields `BitstreamFailed`.
    pub fn evaluate(reports: &[TargetReport]) -> GateVerdict {
        let violations: Vec<String> = reports
            .iter()
            .filter(|r| r.outcome.is_failure())
            .map(|r| format!("{}: {}", r.target, r.outcome))
            .collect();
        let outcome = reports
            .iter()
            .fold(Outcome::Ok, |acc, r| acc.then(r.outcome));

        let built = reports
            .iter()
            .filter(|r| r.outcome != Outcome::Skipped)
            .count();
        let passed = violations.is_empty();
        let message = if passed {
            format!("{built} target(s) built, {} skipped", reports.len() - built)
        } else {
            format!(
                "Build failed: {} of {built} target(s) failed",
                violations.len()
            )
        };

        GateVerdict {
            passed,
            outcome: if passed { Outcome::Ok } else { outcome },
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(target: &str, outcome: Outcome) -> TargetReport {
        TargetReport::early(target, None, outcome)
    }

    #[test]
    fn test_empty_run_passes() {
        let verdict = BuildGate::evaluate(&[]);
        assert!(verdict.passed);
        assert_eq!(verdict.outcome, Outcome::Ok);
    }

    #[test]
    fn test_skipped_targets_do_not_fail() {
        let verdict = BuildGate::evaluate(&[
            report("fpga0", Outcome::Ok),
            report("fpga1", Outcome::Skipped),
        ]);
        assert!(verdict.passed);
        assert_eq!(verdict.message, "1 target(s) built, 1 skipped");
    }

    #[test]
    fn test_first_failure_is_aggregate() {
        let verdict = BuildGate::evaluate(&[
            report("fpga0", Outcome::Ok),
            report("fpga1", Outcome::BitstreamFailed),
            report("fpga2", Outcome::Ok),
            report("fpga3", Outcome::NotReady),
        ]);
        assert!(!verdict.passed);
        assert_eq!(verdict.outcome, Outcome::BitstreamFailed);
        assert_eq!(
            verdict.violations,
            vec!["fpga1: bitstream_failed", "fpga3: not_ready"]
        );
    }
}
