//! Per-target progress reporting: the live feed plus a persistent log file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use fpgabuild_core::progress::{finished, started};
use fpgabuild_core::{obs, ProgressSink, Subdir};
use tracing::warn;

use crate::stage::Stage;

/// Append-only log at `<local root>/output/<target>_build.log`.
#[derive(Debug, Clone)]
pub struct TargetLog {
    path: PathBuf,
}

impl TargetLog {
    pub fn new(local_root: &Path, target: &str) -> Self {
        Self {
            path: local_root
                .join(Subdir::Output.name())
                .join(format!("{target}_build.log")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line. Failures are logged and otherwise ignored.
    pub fn append(&self, message: &str) {
        if let Err(e) = self.try_append(message) {
            warn!(path = %self.path.display(), error = %e, "could not write target log");
        }
    }

    fn try_append(&self, message: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "[{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )
    }
}

/// Sends a target's progress lines to the shared sink, its log file and the
/// structured event stream.
#[derive(Clone)]
pub struct StageReporter {
    target: String,
    sink: Arc<dyn ProgressSink>,
    log: TargetLog,
}

impl std::fmt::Debug for StageReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageReporter")
            .field("target", &self.target)
            .field("log", &self.log.path)
            .finish()
    }
}

impl StageReporter {
    pub fn new(target: impl Into<String>, sink: Arc<dyn ProgressSink>, log: TargetLog) -> Self {
        Self {
            target: target.into(),
            sink,
            log,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// A free-form progress line.
    pub fn note(&self, message: &str) {
        self.sink.line(&self.target, message);
        self.log.append(message);
    }

    pub fn stage_started(&self, stage: Stage) -> Instant {
        obs::emit_stage_started(&self.target, stage.name());
        self.note(&started(stage.title()));
        Instant::now()
    }

    pub fn stage_finished(&self, stage: Stage, since: Instant, success: bool) {
        obs::emit_stage_finished(
            &self.target,
            stage.name(),
            since.elapsed().as_millis() as u64,
            success,
        );
        self.note(&finished(stage.title(), success));
    }

    /// Detail that goes to the log file only.
    pub fn detail(&self, message: &str) {
        self.log.append(message);
    }
}
