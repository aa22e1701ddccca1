//! Purge planning.
//!
//! Plans are pure: they turn a target description plus directory listings
//! into the list of paths to delete. [`crate::target::BuildTarget`] fetches
//! the listings and executes the plan through its channel.

use std::collections::HashMap;

use fpgabuild_core::{Subdir, TargetLayout, TargetSpec};
use serde::{Deserialize, Serialize};

/// What to clean before a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeScope {
    /// Every generated hardware directory.
    All,
    /// Only files namespaced by these core instances.
    Selective(Vec<String>),
    /// Board support libraries and published software artifacts.
    Software,
}

/// Directories searched for core-prefixed files.
pub const SELECTIVE_DIRS: [Subdir; 3] = [Subdir::Hdl, Subdir::Synthesis, Subdir::Implementation];

/// Whether `name` belongs to core `instance`: the instance itself or the
/// instance followed by `_` or `.`.
pub fn belongs_to(name: &str, instance: &str) -> bool {
    match name.strip_prefix(instance) {
        Some(rest) => rest.is_empty() || rest.starts_with('_') || rest.starts_with('.'),
        None => false,
    }
}

/// Paths removed by a full purge.
pub fn plan_all(layout: &TargetLayout) -> Vec<String> {
    Subdir::generated()
        .iter()
        .map(|d| layout.subdir(*d))
        .collect()
}

/// Paths removed by a software purge.
pub fn plan_software(spec: &TargetSpec, layout: &TargetLayout) -> Vec<String> {
    let mut paths = Vec::new();
    for proc in &spec.processors {
        paths.push(layout.join(&[&proc.instance]));
        if !proc.output_artifact.is_empty() {
            paths.push(layout.file(Subdir::Output, &proc.output_artifact));
        }
    }
    paths
}

/// Paths removed by a selective purge of `cores`.
///
/// `listings` holds the entry names of each directory in
/// [`SELECTIVE_DIRS`]. Names that are not cores of `spec` are ignored.
/// Software owned by a purged core through `ProcessorDescriptor::core` is
/// removed with it.
pub fn plan_selective(
    spec: &TargetSpec,
    layout: &TargetLayout,
    cores: &[String],
    listings: &HashMap<Subdir, Vec<String>>,
) -> Vec<String> {
    let (cores, _) = split_known_cores(spec, cores);
    let mut paths = Vec::new();
    for dir in SELECTIVE_DIRS {
        let Some(entries) = listings.get(&dir) else {
            continue;
        };
        let mut names: Vec<&String> = entries
            .iter()
            .filter(|name| cores.iter().any(|core| belongs_to(name, core)))
            .collect();
        names.sort();
        paths.extend(names.into_iter().map(|n| layout.file(dir, n)));
    }

    for proc in &spec.processors {
        let owned = proc
            .core
            .as_deref()
            .is_some_and(|c| cores.iter().any(|core| core == c));
        if owned {
            paths.push(layout.join(&[&proc.instance]));
            if !proc.output_artifact.is_empty() {
                paths.push(layout.file(Subdir::Output, &proc.output_artifact));
            }
        }
    }
    paths
}

/// Split `names` into cores `spec` declares and names it does not.
pub fn split_known_cores(spec: &TargetSpec, names: &[String]) -> (Vec<String>, Vec<String>) {
    names
        .iter()
        .cloned()
        .partition(|name| spec.cores.iter().any(|core| &core.instance == name))
}

/// Cores a selective purge should clean when the caller named none: the
/// target's opt-in cores.
pub fn default_cores(spec: &TargetSpec) -> Vec<String> {
    spec.purge_cores().map(|c| c.instance.clone()).collect()
}
