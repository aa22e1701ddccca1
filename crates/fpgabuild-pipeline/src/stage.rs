//! Build stage catalogue.

use fpgabuild_core::{Outcome, TargetSpec};
use serde::{Deserialize, Serialize};

/// The two independent stage groups of a target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageGroup {
    Hardware,
    Software,
}

/// Builtin build stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// platgen: HDL and netlist scripts from `system.mhs`
    Generate,

    /// xst per logic core, then the system netlist, then ngcbuild
    SynthesizeCore,

    /// ngdbuild, map, par
    Implement,

    /// bitgen (or the target's custom script)
    Bitstream,

    /// Per-processor boot codelet
    CodeletCompile,

    /// data2mem: codelets into the download bitstream
    CodeletMerge,

    /// Regenerate `system.mss`
    SoftwarePrepare,

    /// libgen: board support libraries
    LibGen,

    /// Patch device trees and install them in the kernel tree
    DeviceTreeUpdate,

    /// Applications and kernel images
    Compile,
}

impl Stage {
    pub const HARDWARE: [Stage; 6] = [
        Stage::Generate,
        Stage::SynthesizeCore,
        Stage::Implement,
        Stage::Bitstream,
        Stage::CodeletCompile,
        Stage::CodeletMerge,
    ];

    pub const SOFTWARE: [Stage; 4] = [
        Stage::SoftwarePrepare,
        Stage::LibGen,
        Stage::DeviceTreeUpdate,
        Stage::Compile,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::SynthesizeCore => "synthesize_core",
            Stage::Implement => "implement",
            Stage::Bitstream => "bitstream",
            Stage::CodeletCompile => "codelet_compile",
            Stage::CodeletMerge => "codelet_merge",
            Stage::SoftwarePrepare => "software_prepare",
            Stage::LibGen => "lib_gen",
            Stage::DeviceTreeUpdate => "device_tree_update",
            Stage::Compile => "compile",
        }
    }

    /// Name used in progress lines.
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Generate => "Generate",
            Stage::SynthesizeCore => "Synthesize",
            Stage::Implement => "Implement",
            Stage::Bitstream => "Bitstream",
            Stage::CodeletCompile => "Codelet Compile",
            Stage::CodeletMerge => "Codelet Merge",
            Stage::SoftwarePrepare => "Software Prepare",
            Stage::LibGen => "LibGen",
            Stage::DeviceTreeUpdate => "Device Tree Update",
            Stage::Compile => "Compile",
        }
    }

    pub fn group(&self) -> StageGroup {
        if Stage::HARDWARE.contains(self) {
            StageGroup::Hardware
        } else {
            StageGroup::Software
        }
    }

    /// Outcome recorded on the target when this stage fails.
    pub fn failure(&self) -> Outcome {
        match self {
            Stage::Generate => Outcome::GenerateFailed,
            Stage::SynthesizeCore => Outcome::SynthesizeFailed,
            Stage::Implement => Outcome::ImplementFailed,
            Stage::Bitstream => Outcome::BitstreamFailed,
            Stage::CodeletCompile => Outcome::CodeletCompileFailed,
            Stage::CodeletMerge => Outcome::CodeletMergeFailed,
            Stage::SoftwarePrepare => Outcome::SoftwarePrepareFailed,
            Stage::LibGen => Outcome::LibGenFailed,
            Stage::DeviceTreeUpdate => Outcome::DeviceTreeUpdateFailed,
            Stage::Compile => Outcome::CompileFailed,
        }
    }

    /// Whether the stage has any work for `spec`. Stages without work are
    /// not run and not reported.
    pub fn applies_to(&self, spec: &TargetSpec) -> bool {
        match self {
            Stage::CodeletCompile | Stage::CodeletMerge => !spec.processors.is_empty(),
            Stage::DeviceTreeUpdate => spec.processors.iter().any(|p| p.is_linux()),
            Stage::SoftwarePrepare | Stage::LibGen | Stage::Compile => {
                !spec.processors.is_empty()
            }
            _ => true,
        }
    }

    pub fn parse(name: &str) -> Option<Stage> {
        Stage::HARDWARE
            .iter()
            .chain(Stage::SOFTWARE.iter())
            .copied()
            .find(|s| s.name() == name)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
