//! fpgabuild-pipeline: per-target build pipelines and the coordinator.
//!
//! A [`BuildTarget`] owns one session channel and runs two independent stage
//! groups over it:
//!
//! - hardware: generate, synthesize, implement, bitstream, codelet compile,
//!   codelet merge
//! - software: software prepare, libgen, device tree update, compile
//!
//! Each group stops at its first failed stage and records that stage's
//! [`Outcome`](fpgabuild_core::Outcome). The [`Coordinator`] runs one worker
//! per target over a round-robin server pool and folds the outcomes through
//! [`BuildGate`].

pub mod coordinator;
pub mod error;
pub mod gate;
pub mod hardware;
pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod purge;
pub mod readiness;
pub mod report;
pub mod runner;
pub mod settings;
pub mod software;
pub mod stage;
pub mod target;

pub use coordinator::{
    assign_servers, AbortHandle, ChannelFactory, Coordinator, PurgeCallback, SessionFactory,
    SkipCallback, SynthesisResult, SynthesizeOptions,
};
pub use error::{StageError, StageOutcome};
pub use gate::{BuildGate, GateVerdict, TargetReport};
pub use pipeline::{GroupReport, StagePipeline, StageRecord};
pub use preview::{preview_stage, DryRunChannel};
pub use progress::{StageReporter, TargetLog};
pub use purge::PurgeScope;
pub use readiness::{ready_for_compilation, ready_for_synthesis, Missing, Readiness};
pub use report::{MapReportExtractor, ResourceReporter};
pub use runner::{StageContext, ToolResult, ToolRunner, ToolStep};
pub use settings::BuildSettings;
pub use stage::{Stage, StageGroup};
pub use target::BuildTarget;
