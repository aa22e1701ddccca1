//! Domain model for FPGA build targets.
//!
//! Plain data: everything here is `serde`-loadable from a build manifest and
//! carries no session or runtime state.

pub mod error;
pub mod layout;
pub mod outcome;
pub mod processor;
pub mod server;
pub mod target;

pub use error::{CoreError, CoreResult};
pub use layout::{PathStyle, Subdir, TargetLayout};
pub use outcome::Outcome;
pub use processor::{DiscoveryRule, OsKind, ProcessorDescriptor, SoftwareApp, SourceSet};
pub use server::{Credentials, HostOs, Server};
pub use target::{ExecutionMode, HdlLanguage, LogicCore, PartDescriptor, TargetSpec};
