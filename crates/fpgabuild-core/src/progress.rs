//! Human-readable progress feed.
//!
//! Every stage reports `"<target>: <Stage>..."` when it starts and
//! `"<target>: <Stage>...Complete!"` or `"<target>: <Stage>...ERROR!"` when
//! it ends. Sinks receive the target and the message separately so a UI can
//! group lines per target.

/// Receives progress lines from all workers.
pub trait ProgressSink: Send + Sync {
    fn line(&self, target: &str, message: &str);
}

/// Prints progress lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn line(&self, target: &str, message: &str) {
        println!("{}", format_line(target, message));
    }
}

/// Discards progress lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn line(&self, _target: &str, _message: &str) {}
}

pub fn format_line(target: &str, message: &str) -> String {
    format!("{target}: {message}")
}

pub fn started(stage: &str) -> String {
    format!("{stage}...")
}

pub fn finished(stage: &str, success: bool) -> String {
    if success {
        format!("{stage}...Complete!")
    } else {
        format!("{stage}...ERROR!")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_messages() {
        assert_eq!(format_line("fpga0", &started("Map")), "fpga0: Map...");
        assert_eq!(finished("Map", true), "Map...Complete!");
        assert_eq!(finished("Map", false), "Map...ERROR!");
    }
}
