//! The per-target outcome taxonomy.
//!
//! One `Outcome` is attached to each target. Stage failures are recorded here
//! instead of travelling as errors across component boundaries.

use serde::{Deserialize, Serialize};

/// Result of a target's pipeline, or of a single stage group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    /// Not built on purpose: disabled, skipped by the caller, or no primary
    /// hardware description present. Not an error.
    Skipped,
    /// A readiness precondition failed before any command ran.
    NotReady,
    AuthenticationFailed,
    DirectoryCreateFailed,
    PurgeFailed,
    GenerateFailed,
    SynthesizeFailed,
    ImplementFailed,
    BitstreamFailed,
    SoftwarePrepareFailed,
    LibGenFailed,
    DeviceTreeUpdateFailed,
    CompileFailed,
    CodeletCompileFailed,
    CodeletMergeFailed,
    OutputDownloadFailed,
    /// Output retrieval is not implemented for the build server's OS.
    DownloadUnsupported,
    UserAborted,
    UnspecifiedInternalError,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    /// True for every terminal value other than `Ok` and `Skipped`.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Outcome::Ok | Outcome::Skipped)
    }

    /// Stable snake_case label used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Skipped => "skipped",
            Outcome::NotReady => "not_ready",
            Outcome::AuthenticationFailed => "authentication_failed",
            Outcome::DirectoryCreateFailed => "directory_create_failed",
            Outcome::PurgeFailed => "purge_failed",
            Outcome::GenerateFailed => "generate_failed",
            Outcome::SynthesizeFailed => "synthesize_failed",
            Outcome::ImplementFailed => "implement_failed",
            Outcome::BitstreamFailed => "bitstream_failed",
            Outcome::SoftwarePrepareFailed => "software_prepare_failed",
            Outcome::LibGenFailed => "lib_gen_failed",
            Outcome::DeviceTreeUpdateFailed => "device_tree_update_failed",
            Outcome::CompileFailed => "compile_failed",
            Outcome::CodeletCompileFailed => "codelet_compile_failed",
            Outcome::CodeletMergeFailed => "codelet_merge_failed",
            Outcome::OutputDownloadFailed => "output_download_failed",
            Outcome::DownloadUnsupported => "download_unsupported",
            Outcome::UserAborted => "user_aborted",
            Outcome::UnspecifiedInternalError => "unspecified_internal_error",
        }
    }

    /// Keep `self` if it already failed, otherwise take `next`.
    ///
    /// Folding outcomes with this keeps the first failure.
    pub fn then(self, next: Outcome) -> Outcome {
        if self.is_failure() {
            self
        } else {
            next
        }
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Outcome::Ok
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
