//! Readiness gates evaluated once before a target enters a pipeline.
//!
//! Each gate is an ordered list of named validators. A validator looks at
//! one field and returns a [`Missing`] entry when it is not usable; the gate
//! folds the list, so every problem is reported at once.

use fpgabuild_core::{ProcessorDescriptor, Server, TargetSpec};
use serde::Serialize;

/// A required field that is absent or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Missing {
    /// Validator name, e.g. `part.package`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of a readiness gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub missing: Vec<Missing>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.missing.is_empty()
    }

    /// One line per missing field.
    pub fn describe(&self) -> String {
        self.missing
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

type Validator = fn(&TargetSpec, Option<&Server>) -> Vec<Missing>;

fn missing(field: impl Into<String>, message: impl Into<String>) -> Vec<Missing> {
    vec![Missing {
        field: field.into(),
        message: message.into(),
    }]
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn target_id(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    if blank(&spec.id) {
        return missing("id", "target id is empty");
    }
    Vec::new()
}

fn local_root(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    if spec.local_root.as_os_str().is_empty() {
        return missing("local_root", "target directory is not set");
    }
    Vec::new()
}

fn part_size(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    if blank(&spec.part.size) {
        return missing("part.size", "device size is empty");
    }
    Vec::new()
}

fn part_package(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    if blank(&spec.part.package) {
        return missing("part.package", "device package is empty");
    }
    Vec::new()
}

fn part_speed(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    if blank(&spec.part.speed_grade) {
        return missing("part.speed_grade", "speed grade is empty");
    }
    Vec::new()
}

fn remote_root(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    if spec.is_remote() && spec.remote_root.as_deref().map_or(true, blank) {
        return missing("remote_root", "remote target has no remote directory");
    }
    Vec::new()
}

fn server_address(spec: &TargetSpec, server: Option<&Server>) -> Vec<Missing> {
    if !spec.is_remote() {
        return Vec::new();
    }
    match server {
        None => missing("server", "remote target has no build server assigned"),
        Some(s) if blank(&s.address) => missing("server.address", "server address is empty"),
        Some(_) => Vec::new(),
    }
}

fn server_user(spec: &TargetSpec, server: Option<&Server>) -> Vec<Missing> {
    match server {
        Some(s) if spec.is_remote() && blank(&s.user) => {
            missing("server.user", "server user is empty")
        }
        _ => Vec::new(),
    }
}

fn per_processor(
    spec: &TargetSpec,
    check: impl Fn(&ProcessorDescriptor) -> Vec<(&'static str, &'static str)>,
) -> Vec<Missing> {
    spec.processors
        .iter()
        .flat_map(|p| {
            check(p).into_iter().map(move |(field, message)| Missing {
                field: format!("processors.{}.{}", p.instance, field),
                message: message.to_string(),
            })
        })
        .collect()
}

fn output_artifacts(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    per_processor(spec, |p| {
        if blank(&p.output_artifact) {
            vec![("output_artifact", "output artifact name is empty")]
        } else {
            Vec::new()
        }
    })
}

fn linux_toolchain(spec: &TargetSpec, _: Option<&Server>) -> Vec<Missing> {
    per_processor(spec, |p| {
        let mut out = Vec::new();
        if !p.is_linux() {
            return out;
        }
        if p.kernel_source.as_deref().map_or(true, blank) {
            out.push(("kernel_source", "Linux processor needs a kernel source tree"));
        }
        if p.device_tree.as_deref().map_or(true, blank) {
            out.push(("device_tree", "Linux processor needs a device tree"));
        }
        if blank(&p.cross_compile) {
            out.push(("cross_compile", "Linux processor needs a cross compiler"));
        }
        out
    })
}

const SYNTHESIS_RULES: &[(&str, Validator)] = &[
    ("id", target_id),
    ("local_root", local_root),
    ("part.size", part_size),
    ("part.package", part_package),
    ("part.speed_grade", part_speed),
    ("remote_root", remote_root),
    ("server.address", server_address),
    ("server.user", server_user),
];

const COMPILATION_RULES: &[(&str, Validator)] = &[
    ("id", target_id),
    ("local_root", local_root),
    ("part.size", part_size),
    ("part.package", part_package),
    ("part.speed_grade", part_speed),
    ("remote_root", remote_root),
    ("server.address", server_address),
    ("server.user", server_user),
    ("processors.output_artifact", output_artifacts),
    ("processors.linux_toolchain", linux_toolchain),
];

fn fold(rules: &[(&str, Validator)], spec: &TargetSpec, server: Option<&Server>) -> Readiness {
    Readiness {
        missing: rules
            .iter()
            .flat_map(|(_, rule)| rule(spec, server))
            .collect(),
    }
}

/// Preconditions of the hardware pipeline.
pub fn ready_for_synthesis(spec: &TargetSpec, server: Option<&Server>) -> Readiness {
    fold(SYNTHESIS_RULES, spec, server)
}

/// Preconditions of the software pipeline.
pub fn ready_for_compilation(spec: &TargetSpec, server: Option<&Server>) -> Readiness {
    fold(COMPILATION_RULES, spec, server)
}

/// Names of the validators behind each gate, in evaluation order.
pub fn rule_names(compilation: bool) -> Vec<&'static str> {
    let rules = if compilation {
        COMPILATION_RULES
    } else {
        SYNTHESIS_RULES
    };
    rules.iter().map(|(name, _)| *name).collect()
}
