//! Fixed directory layout of a build target.
//!
//! Paths are kept as strings in the dialect of the host that executes the
//! build, which for remote targets is not the host running this process.

use serde::{Deserialize, Serialize};

/// Primary hardware description, relative to the target root.
pub const SYSTEM_MHS: &str = "system.mhs";
/// Software description, relative to the target root.
pub const SYSTEM_MSS: &str = "system.mss";
/// Constraints file, under `data/`.
pub const SYSTEM_UCF: &str = "system.ucf";
/// Top-level design name used by every implementation tool.
pub const SYSTEM: &str = "system";

/// Path separator dialect of a build host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathStyle {
    Posix,
    Windows,
}

impl PathStyle {
    pub fn separator(&self) -> char {
        match self {
            PathStyle::Posix => '/',
            PathStyle::Windows => '\\',
        }
    }

    pub fn native() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Posix
        }
    }
}

/// Well-known subdirectories of a target root.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Subdir {
    Data,
    Etc,
    Hdl,
    Implementation,
    Pcores,
    Synthesis,
    Lib,
    Output,
    Bsp,
}

impl Subdir {
    pub const ALL: [Subdir; 9] = [
        Subdir::Data,
        Subdir::Etc,
        Subdir::Hdl,
        Subdir::Implementation,
        Subdir::Pcores,
        Subdir::Synthesis,
        Subdir::Lib,
        Subdir::Output,
        Subdir::Bsp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Subdir::Data => "data",
            Subdir::Etc => "etc",
            Subdir::Hdl => "hdl",
            Subdir::Implementation => "implementation",
            Subdir::Pcores => "pcores",
            Subdir::Synthesis => "synthesis",
            Subdir::Lib => "lib",
            Subdir::Output => "output",
            Subdir::Bsp => "bsp",
        }
    }

    /// Directories whose content is regenerated by the hardware flow.
    pub fn generated() -> [Subdir; 3] {
        [Subdir::Hdl, Subdir::Synthesis, Subdir::Implementation]
    }
}

/// Root directory of a target on its build host, plus the host's path style.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetLayout {
    pub root: String,
    pub style: PathStyle,
}

impl TargetLayout {
    pub fn new(root: impl Into<String>, style: PathStyle) -> Self {
        let root = root.into();
        let trimmed = root
            .trim_end_matches(['/', '\\'])
            .to_string();
        Self {
            root: if trimmed.is_empty() { root } else { trimmed },
            style,
        }
    }

    /// Join relative components onto the root, normalising separators.
    pub fn join(&self, parts: &[&str]) -> String {
        let sep = self.style.separator();
        let mut out = self.root.clone();
        for part in parts {
            for piece in part.split(['/', '\\']).filter(|p| !p.is_empty()) {
                if !out.ends_with(sep) {
                    out.push(sep);
                }
                out.push_str(piece);
            }
        }
        out
    }

    pub fn subdir(&self, dir: Subdir) -> String {
        self.join(&[dir.name()])
    }

    pub fn file(&self, dir: Subdir, name: &str) -> String {
        self.join(&[dir.name(), name])
    }

    pub fn mhs(&self) -> String {
        self.join(&[SYSTEM_MHS])
    }

    pub fn mss(&self) -> String {
        self.join(&[SYSTEM_MSS])
    }

    pub fn ucf(&self) -> String {
        self.file(Subdir::Data, SYSTEM_UCF)
    }

    /// Render a root-relative path (`/`-separated) in this host's dialect.
    pub fn relative(&self, rel: &str) -> String {
        let sep = self.style.separator().to_string();
        rel.split(['/', '\\'])
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(&sep)
    }
}
