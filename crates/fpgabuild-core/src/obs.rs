//! Structured observability hooks for build lifecycle events.
//!
//! This module provides:
//! - Target-scoped tracing spans via the `TargetSpan` RAII guard
//! - Emission functions for the key lifecycle events of a build run:
//!   run start, stage start/finish, target finish, run finish, channel errors
//!
//! Events are emitted at `info!` level except channel errors, which warn.

use tracing::{info, warn};

/// RAII guard that enters a target-scoped span for synchronous sections.
///
/// Async workers should prefer [`target_span`] with `Instrument`, since an
/// entered span must not be held across an `.await`.
pub struct TargetSpan {
    _span: tracing::span::EnteredSpan,
}

impl TargetSpan {
    /// Create and enter a span tagged with the run and target ids.
    pub fn enter(run_id: &str, target: &str) -> Self {
        Self {
            _span: target_span(run_id, target).entered(),
        }
    }
}

/// Build (without entering) the span used for one target's worker.
pub fn target_span(run_id: &str, target: &str) -> tracing::Span {
    tracing::info_span!("fpgabuild.target", run_id = %run_id, target = %target)
}

/// Emit event: a coordinator run started.
pub fn emit_build_started(run_id: &str, targets: usize, servers: usize) {
    info!(
        event = "build.started",
        run_id = %run_id,
        targets = targets,
        servers = servers,
    );
}

/// Emit event: a stage started on a target.
pub fn emit_stage_started(target: &str, stage: &str) {
    info!(event = "stage.started", target = %target, stage = %stage);
}

/// Emit event: a stage finished on a target.
pub fn emit_stage_finished(target: &str, stage: &str, duration_ms: u64, success: bool) {
    info!(
        event = "stage.finished",
        target = %target,
        stage = %stage,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: a target worker finished with its final outcome.
pub fn emit_target_finished(target: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "target.finished",
        target = %target,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

/// Emit event: the whole coordinator run finished.
pub fn emit_build_finished(run_id: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "build.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

/// Emit event: a session channel operation failed (warning level).
pub fn emit_channel_error(target: &str, operation: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "channel.error",
        target = %target,
        operation = %operation,
        error = %error,
    );
}
