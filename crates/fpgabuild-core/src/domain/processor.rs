//! Processor and software application descriptors.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{CoreError, CoreResult};

/// Operating system a processor runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OsKind {
    #[default]
    Standalone,
    Linux,
}

/// A `(directory, filter)` discovery rule, evaluated when a stage script is
/// generated. Filters use `*` and `?` wildcards; `;` separates alternatives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryRule {
    /// Directory relative to the target root.
    pub directory: String,
    pub filter: String,
}

impl DiscoveryRule {
    pub fn new(directory: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            filter: filter.into(),
        }
    }

    /// Compile the wildcard filter into an anchored regex.
    pub fn matcher(&self) -> CoreResult<Regex> {
        let alternatives: Vec<String> = self
            .filter
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(wildcard_to_regex)
            .collect();
        let pattern = if alternatives.is_empty() {
            "^.*$".to_string()
        } else {
            format!("^(?:{})$", alternatives.join("|"))
        };
        Regex::new(&pattern).map_err(|source| CoreError::InvalidFilter {
            filter: self.filter.clone(),
            source,
        })
    }

    /// Keep the entries of `listing` that match, sorted, as root-relative
    /// `/`-separated paths.
    pub fn select(&self, listing: &[String]) -> CoreResult<Vec<String>> {
        let re = self.matcher()?;
        let dir = self.directory.trim_end_matches(['/', '\\']);
        let mut hits: Vec<String> = listing
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty() && re.is_match(name))
            .map(|name| {
                if dir.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", dir, name)
                }
            })
            .collect();
        hits.sort();
        hits.dedup();
        Ok(hits)
    }
}

fn wildcard_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

/// Explicit files plus discovery rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSet {
    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub rules: Vec<DiscoveryRule>,
}

impl SourceSet {
    pub fn files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: DiscoveryRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.rules.is_empty()
    }
}

/// A bare-metal application built for one processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SoftwareApp {
    pub name: String,

    /// Requested `-O` level; read through [`SoftwareApp::optimization_level`].
    #[serde(default = "default_optimization")]
    pub optimization: u8,

    #[serde(default)]
    pub linker_script: Option<String>,

    #[serde(default)]
    pub heap_size: Option<u32>,

    #[serde(default)]
    pub stack_size: Option<u32>,

    /// Libraries linked with `-l`.
    #[serde(default)]
    pub libraries: Vec<String>,

    #[serde(default)]
    pub library_paths: Vec<String>,

    #[serde(default)]
    pub include_paths: Vec<String>,

    #[serde(default)]
    pub sources: SourceSet,

    #[serde(default)]
    pub headers: SourceSet,
}

fn default_optimization() -> u8 {
    2
}

impl SoftwareApp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optimization: default_optimization(),
            linker_script: None,
            heap_size: None,
            stack_size: None,
            libraries: Vec::new(),
            library_paths: Vec::new(),
            include_paths: Vec::new(),
            sources: SourceSet::default(),
            headers: SourceSet::default(),
        }
    }

    pub fn with_sources(mut self, sources: SourceSet) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_optimization(mut self, level: u8) -> Self {
        self.optimization = level;
        self
    }

    /// Optimisation level clamped to 0..=3.
    pub fn optimization_level(&self) -> u8 {
        self.optimization.min(3)
    }
}

fn default_cross_compile() -> String {
    "mb-".to_string()
}

/// A processor instance and the software that runs on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    /// Processor instance name, e.g. `microblaze_0`.
    pub instance: String,

    #[serde(default)]
    pub os: OsKind,

    /// Peripheral instance used as stdin/stdout.
    #[serde(default)]
    pub console: String,

    /// File name published under `output/`.
    #[serde(default)]
    pub output_artifact: String,

    /// Toolchain prefix, e.g. `mb-` or `microblaze-unknown-linux-gnu-`.
    #[serde(default = "default_cross_compile")]
    pub cross_compile: String,

    /// Linux kernel source tree on the build host.
    #[serde(default)]
    pub kernel_source: Option<String>,

    /// Kernel defconfig target, e.g. `mmu_defconfig`.
    #[serde(default)]
    pub kernel_config: Option<String>,

    /// Device tree source, relative to the target root.
    #[serde(default)]
    pub device_tree: Option<String>,

    #[serde(default)]
    pub boot_args: Option<String>,

    /// MAC address patched into the device tree, `00:0a:35:00:00:01`.
    #[serde(default)]
    pub mac_address: Option<String>,

    /// Device tree nodes removed before the kernel build.
    #[serde(default)]
    pub prune_nodes: Vec<String>,

    /// Owning logic core; used to link selective purge to software outputs.
    #[serde(default)]
    pub core: Option<String>,

    #[serde(default)]
    pub apps: Vec<SoftwareApp>,
}

impl ProcessorDescriptor {
    pub fn new(instance: impl Into<String>, os: OsKind) -> Self {
        Self {
            instance: instance.into(),
            os,
            console: String::new(),
            output_artifact: String::new(),
            cross_compile: default_cross_compile(),
            kernel_source: None,
            kernel_config: None,
            device_tree: None,
            boot_args: None,
            mac_address: None,
            prune_nodes: Vec::new(),
            core: None,
            apps: Vec::new(),
        }
    }

    pub fn with_console(mut self, console: impl Into<String>) -> Self {
        self.console = console.into();
        self
    }

    pub fn with_output(mut self, artifact: impl Into<String>) -> Self {
        self.output_artifact = artifact.into();
        self
    }

    pub fn with_app(mut self, app: SoftwareApp) -> Self {
        self.apps.push(app);
        self
    }

    pub fn is_linux(&self) -> bool {
        self.os == OsKind::Linux
    }

    /// `gcc` for this processor's toolchain.
    pub fn compiler(&self) -> String {
        format!("{}gcc", self.cross_compile)
    }

    /// Device tree file stem, which names the kernel `simpleImage` target.
    pub fn device_tree_stem(&self) -> Option<String> {
        let dts = self.device_tree.as_deref()?;
        let file = dts.rsplit(['/', '\\']).next().unwrap_or(dts);
        let stem = file.strip_suffix(".dts").unwrap_or(file);
        (!stem.is_empty()).then(|| stem.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimization_is_clamped() {
        assert_eq!(SoftwareApp::new("hello").with_optimization(9).optimization_level(), 3);
        assert_eq!(SoftwareApp::new("hello").with_optimization(0).optimization_level(), 0);
    }

    #[test]
    fn test_rule_select_filters_and_sorts() {
        let rule = DiscoveryRule::new("src", "*.c;*.S");
        let listing = vec![
            "main.c".to_string(),
            "boot.S".to_string(),
            "notes.txt".to_string(),
            "aux.c".to_string(),
        ];
        let hits = rule.select(&listing).unwrap();
        assert_eq!(hits, vec!["src/aux.c", "src/boot.S", "src/main.c"]);
    }

    #[test]
    fn test_rule_escapes_regex_metacharacters() {
        let rule = DiscoveryRule::new("", "a+b?.c");
        let listing = vec!["a+bx.c".to_string(), "aab1.c".to_string()];
        assert_eq!(rule.select(&listing).unwrap(), vec!["a+bx.c"]);
    }

    #[test]
    fn test_device_tree_stem() {
        let mut cpu = ProcessorDescriptor::new("microblaze_0", OsKind::Linux);
        cpu.device_tree = Some("bsp/microblaze_0/ml507.dts".to_string());
        assert_eq!(cpu.device_tree_stem().as_deref(), Some("ml507"));
    }
}
