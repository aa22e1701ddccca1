//! Line-oriented rewrites of build input files.
//!
//! Every edit is a pure `old text -> new text` function. [`rewrite_file`]
//! applies one to a file on disk: a missing file is passed as `None`, and the
//! original is replaced atomically only when the edit succeeds.

pub mod dts;
pub mod mss;

use std::io::Write;
use std::path::Path;

use tracing::debug;

pub use dts::{apply_device_tree_edits, patch_mac, prune_nodes, set_boot_args};
pub use mss::regenerate_mss;

/// Errors produced by text surgery.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for text surgery.
pub type EditResult<T> = std::result::Result<T, EditError>;

/// Apply `edit` to the file at `path`.
///
/// Returns `true` when the file content changed. The new content is written
/// to a sibling temp file and renamed over the original.
pub fn rewrite_file<F>(path: &Path, edit: F) -> EditResult<bool>
where
    F: FnOnce(Option<&str>) -> EditResult<String>,
{
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let updated = edit(existing.as_deref())?;
    if existing.as_deref() == Some(updated.as_str()) {
        debug!(path = %path.display(), "rewrite produced no change");
        return Ok(false);
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    staged.write_all(updated.as_bytes())?;
    staged.flush()?;
    staged.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = updated.len(), "file rewritten");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.mss");
        let changed = rewrite_file(&path, |old| {
            assert!(old.is_none());
            Ok("fresh\n".to_string())
        })
        .unwrap();
        assert!(changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn test_rewrite_leaves_original_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.dts");
        std::fs::write(&path, "original").unwrap();

        let err = rewrite_file(&path, |_| {
            Err(EditError::Parse {
                line: 3,
                message: "unbalanced braces".to_string(),
            })
        })
        .unwrap_err();
        assert!(matches!(err, EditError::Parse { line: 3, .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
        // No stray temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_rewrite_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("same.txt");
        std::fs::write(&path, "same").unwrap();
        let changed = rewrite_file(&path, |old| Ok(old.unwrap_or_default().to_string())).unwrap();
        assert!(!changed);
    }
}
