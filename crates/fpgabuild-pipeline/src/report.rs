//! Resource utilisation reports for successfully built targets.

use std::path::PathBuf;

use fpgabuild_core::{Subdir, TargetSpec};

/// Produces a resource report from a target's local outputs.
pub trait ResourceReporter: Send + Sync {
    /// Write the report and return its path, or `None` when the target has
    /// nothing to report on.
    fn compile(&self, spec: &TargetSpec) -> std::io::Result<Option<PathBuf>>;
}

/// Copies the "Design Summary" section of the map report.
///
/// The map report reaches `output/` with the other tool logs, so this works
/// the same for local and downloaded remote builds.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapReportExtractor;

const SUMMARY_HEADER: &str = "Design Summary";

impl MapReportExtractor {
    /// The summary section: from the header line up to the next blank line
    /// that follows a non-empty body, or the end of the report.
    pub fn extract(report: &str) -> Option<String> {
        let mut lines = report.lines().skip_while(|l| !l.trim_start().starts_with(SUMMARY_HEADER));
        let header = lines.next()?;
        let mut out = vec![header.trim_end()];
        let mut body = 0;
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if body > 0 {
                    break;
                }
                continue;
            }
            if body == 0 && trimmed.chars().all(|c| c == '-') {
                out.push(line.trim_end());
                continue;
            }
            out.push(line.trim_end());
            body += 1;
        }
        let mut text = out.join("\n");
        text.push('\n');
        Some(text)
    }
}

impl ResourceReporter for MapReportExtractor {
    fn compile(&self, spec: &TargetSpec) -> std::io::Result<Option<PathBuf>> {
        let output = spec.local_root.join(Subdir::Output.name());
        let source = output.join("system_map.mrp");
        let report = match std::fs::read_to_string(&source) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(summary) = Self::extract(&report) else {
            return Ok(None);
        };
        let path = output.join(format!("{}_resources.txt", spec.id));
        std::fs::write(&path, summary)?;
        Ok(Some(path))
    }
}
