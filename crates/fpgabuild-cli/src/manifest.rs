//! Build manifest: the TOML file naming the targets and servers of a run.
//!
//! ```toml
//! [settings]
//! stage_timeout_secs = 7200
//!
//! [[servers]]
//! address = "synth1.lab"
//! user = "builder"
//!
//! [[targets]]
//! id = "fpga0"
//! local_root = "boards/fpga0"
//! mode = "remote"
//! remote_root = "/home/builder/fpga0"
//! part = { size = "xc5vlx110t", package = "ff1136", speed_grade = "-1" }
//! ```
//!
//! Relative `local_root` paths resolve against the manifest's directory.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use fpgabuild_core::{Server, TargetSpec};
use fpgabuild_pipeline::BuildSettings;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub settings: BuildSettings,

    #[serde(default)]
    pub servers: Vec<Server>,

    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn parse(text: &str, base: &Path) -> Result<Self> {
        let mut manifest: Manifest = toml::from_str(text)?;
        for target in &mut manifest.targets {
            if target.local_root.is_relative() {
                target.local_root = base.join(&target.local_root);
            }
        }
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id.as_str()) {
                bail!("duplicate target id '{}'", target.id);
            }
        }
        if self.servers.is_empty() {
            if let Some(target) = self.targets.iter().find(|t| t.is_remote()) {
                bail!("target '{}' is remote but no servers are listed", target.id);
            }
        }
        Ok(())
    }

    pub fn target(&self, id: &str) -> Result<&TargetSpec> {
        self.targets
            .iter()
            .find(|t| t.id == id)
            .with_context(|| format!("no target '{id}' in manifest"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpgabuild_core::{ExecutionMode, HostOs};

    const MANIFEST: &str = r#"
[settings]
stage_timeout_secs = 60
scratch_dir = "/var/tmp"

[[servers]]
address = "synth1.lab"
user = "builder"

[[servers]]
address = "synth2.lab"
user = "builder"
port = 2222
os = "windows"

[[targets]]
id = "fpga0"
local_root = "boards/fpga0"
mode = "remote"
remote_root = "/home/builder/fpga0"
part = { size = "xc5vlx110t", package = "ff1136", speed_grade = "-1" }

[[targets.cores]]
instance = "timer_0"
kind = "xps_timer"
purge = true

[[targets.processors]]
instance = "microblaze_0"
console = "RS232_Uart_1"

[[targets]]
id = "fpga1"
local_root = "/abs/fpga1"
enabled = false
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::parse(MANIFEST, Path::new("/work")).unwrap();
        assert_eq!(manifest.settings.stage_timeout_secs, 60);
        assert_eq!(manifest.settings.scratch_dir, "/var/tmp");
        assert_eq!(manifest.settings.command_timeout_secs, 600);

        assert_eq!(manifest.servers.len(), 2);
        assert_eq!(manifest.servers[0].port, 22);
        assert_eq!(manifest.servers[1].os, HostOs::Windows);
        assert_eq!(manifest.servers[1].key(), "builder@synth2.lab:2222");

        let fpga0 = manifest.target("fpga0").unwrap();
        assert_eq!(fpga0.mode, ExecutionMode::Remote);
        assert_eq!(fpga0.local_root, Path::new("/work/boards/fpga0"));
        assert_eq!(fpga0.part.part_string(), "xc5vlx110tff1136-1");
        assert!(fpga0.cores[0].purge);
        assert_eq!(fpga0.processors[0].cross_compile, "mb-");

        let fpga1 = manifest.target("fpga1").unwrap();
        assert!(!fpga1.enabled);
        assert_eq!(fpga1.local_root, Path::new("/abs/fpga1"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text = r#"
[[targets]]
id = "fpga0"
local_root = "a"

[[targets]]
id = "fpga0"
local_root = "b"
"#;
        let err = Manifest::parse(text, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("duplicate target id"));
    }

    #[test]
    fn test_remote_target_needs_server() {
        let text = r#"
[[targets]]
id = "fpga0"
local_root = "a"
mode = "remote"
remote_root = "/r"
"#;
        assert!(Manifest::parse(text, Path::new(".")).is_err());
    }

    #[test]
    fn test_unknown_target_lookup() {
        let manifest = Manifest::parse("", Path::new(".")).unwrap();
        assert!(manifest.target("nope").is_err());
    }

    #[test]
    fn test_load_resolves_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.toml");
        std::fs::write(&path, "[[targets]]\nid = \"fpga0\"\nlocal_root = \"hw\"\n").unwrap();
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.targets[0].local_root, dir.path().join("hw"));
    }
}
