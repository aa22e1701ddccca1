//! fpgabuild-core: building blocks for remote FPGA builds.
//!
//! This crate holds everything a build pipeline needs below the stage level:
//!
//! - [`domain`]: targets, processors, servers, directory layout and the
//!   [`Outcome`] taxonomy
//! - [`session`]: the [`SessionChannel`] execution-mode abstraction with its
//!   local and SSH implementations
//! - [`script`]: deterministic stage script generation
//! - [`credentials`]: password providers and the per-run cache
//! - [`textedit`]: line-oriented rewrites of `system.mss` and device trees
//! - [`progress`], [`obs`], [`telemetry`]: progress feed, lifecycle events and
//!   tracing setup
//! - [`fakes`]: test doubles shared with the pipeline crate's tests

pub mod credentials;
pub mod domain;
pub mod fakes;
pub mod obs;
pub mod progress;
pub mod script;
pub mod session;
pub mod telemetry;
pub mod textedit;

pub use credentials::{ConsolePrompt, CredentialCache, PasswordProvider};
pub use domain::{
    CoreError, CoreResult, Credentials, ExecutionMode, HostOs, LogicCore, OsKind, Outcome,
    PartDescriptor, ProcessorDescriptor, Server, SoftwareApp, Subdir, TargetLayout, TargetSpec,
};
pub use progress::{ConsoleSink, NullSink, ProgressSink};
pub use script::{ScriptBuilder, ScriptDialect, StageScript};
pub use session::{
    ChannelError, ChannelResult, CommandOutput, LocalChannel, ScriptOutcome, SessionChannel,
    SshChannel, SshSettings, ToolInvocation, TransferDirection,
};
pub use telemetry::init_tracing;
pub use textedit::{EditError, EditResult};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
