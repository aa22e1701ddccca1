//! Build target descriptors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::layout::{PathStyle, TargetLayout, SYSTEM_MHS};
use super::processor::ProcessorDescriptor;
use super::server::HostOs;

/// Where a target's tools run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Local,
    Remote,
}

/// HDL flavour generated by platgen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HdlLanguage {
    #[default]
    Vhdl,
    Verilog,
}

impl HdlLanguage {
    pub fn flag(&self) -> &'static str {
        match self {
            HdlLanguage::Vhdl => "vhdl",
            HdlLanguage::Verilog => "verilog",
        }
    }
}

/// FPGA part: device size, package and speed grade.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartDescriptor {
    /// Device, e.g. `xc5vlx110t`.
    pub size: String,
    /// Package, e.g. `ff1136`.
    pub package: String,
    /// Speed grade, e.g. `-1`.
    pub speed_grade: String,
}

impl PartDescriptor {
    pub fn new(
        size: impl Into<String>,
        package: impl Into<String>,
        speed_grade: impl Into<String>,
    ) -> Self {
        Self {
            size: size.into(),
            package: package.into(),
            speed_grade: speed_grade.into(),
        }
    }

    /// Part string as the Xilinx tools expect it: `xc5vlx110tff1136-1`.
    pub fn part_string(&self) -> String {
        let speed = self.speed_grade.trim();
        if speed.is_empty() || speed.starts_with('-') {
            format!("{}{}{}", self.size, self.package, speed)
        } else {
            format!("{}{}-{}", self.size, self.package, speed)
        }
    }
}

/// A logic core instance owned by a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicCore {
    /// Instance name; prefixes every file generated for the core.
    pub instance: String,

    /// IP core type, e.g. `xps_uartlite`.
    #[serde(default)]
    pub kind: String,

    /// Opt-in flag for selective purge.
    #[serde(default)]
    pub purge: bool,
}

impl LogicCore {
    pub fn new(instance: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            kind: kind.into(),
            purge: false,
        }
    }

    pub fn with_purge(mut self, purge: bool) -> Self {
        self.purge = purge;
        self
    }
}

fn default_enabled() -> bool {
    true
}

/// One synthesizable unit: a single FPGA device and what it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSpec {
    /// Platform id, unique within a run.
    pub id: String,

    /// Synthesis-enable flag; disabled targets end as `Skipped`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Set by the caller (or the skip callback) to leave this target out.
    #[serde(default)]
    pub skip: bool,

    /// Project root on this machine. Always local; outputs land here.
    pub local_root: PathBuf,

    /// Project root on the build server; required in remote mode.
    #[serde(default)]
    pub remote_root: Option<String>,

    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default)]
    pub hdl: HdlLanguage,

    #[serde(default)]
    pub part: PartDescriptor,

    /// Script run instead of `bitgen` when set, relative to the target root.
    #[serde(default)]
    pub bitstream_script: Option<String>,

    #[serde(default)]
    pub processors: Vec<ProcessorDescriptor>,

    #[serde(default)]
    pub cores: Vec<LogicCore>,
}

impl TargetSpec {
    pub fn new(id: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            skip: false,
            local_root: local_root.into(),
            remote_root: None,
            mode: ExecutionMode::Local,
            hdl: HdlLanguage::Vhdl,
            part: PartDescriptor::default(),
            bitstream_script: None,
            processors: Vec::new(),
            cores: Vec::new(),
        }
    }

    pub fn remote(mut self, remote_root: impl Into<String>) -> Self {
        self.mode = ExecutionMode::Remote;
        self.remote_root = Some(remote_root.into());
        self
    }

    pub fn with_part(mut self, part: PartDescriptor) -> Self {
        self.part = part;
        self
    }

    pub fn with_core(mut self, core: LogicCore) -> Self {
        self.cores.push(core);
        self
    }

    pub fn with_processor(mut self, processor: ProcessorDescriptor) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn is_remote(&self) -> bool {
        self.mode == ExecutionMode::Remote
    }

    /// Layout on this machine.
    pub fn local_layout(&self) -> TargetLayout {
        TargetLayout::new(self.local_root.to_string_lossy(), PathStyle::native())
    }

    /// Layout on the host that runs the tools. Remote targets without a
    /// remote root fall back to the local path; readiness rejects that case.
    pub fn exec_layout(&self, host: HostOs) -> TargetLayout {
        match (&self.mode, &self.remote_root) {
            (ExecutionMode::Remote, Some(root)) => TargetLayout::new(root.clone(), host.path_style()),
            _ => self.local_layout(),
        }
    }

    /// Whether the primary hardware description exists locally.
    pub fn has_primary_hdl(&self) -> bool {
        self.local_root.join(SYSTEM_MHS).is_file()
    }

    /// Whether the target is not built at all: disabled, skipped, or without
    /// its primary hardware description.
    pub fn should_skip(&self) -> bool {
        !self.enabled || self.skip || !self.has_primary_hdl()
    }

    /// Cores opted in for selective purge.
    pub fn purge_cores(&self) -> impl Iterator<Item = &LogicCore> {
        self.cores.iter().filter(|c| c.purge)
    }
}
