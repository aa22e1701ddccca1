//! Completion protocol for scripts run over an interactive shell.
//!
//! The shell transport carries no exit status, so every generated script
//! ends by echoing one of two fixed lines. The decoder here watches the
//! shell output for either line and classifies the result. Nothing outside
//! the session layer sees the sentinel strings.
//!
//! Classification is by whole lines (trailing `\r` ignored):
//! - the error line anywhere wins, even when the success line is also present
//! - otherwise the success line means success
//! - neither line means the script did not complete

use regex::Regex;

const MARKER: &str = "##fpgabuild##";

/// Verdict decoded from captured shell output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelVerdict {
    Success,
    Failure,
    Incomplete,
}

/// The pair of sentinel lines for one stage.
#[derive(Debug, Clone)]
pub struct Sentinel {
    success: String,
    error: String,
    completion: Regex,
}

impl Sentinel {
    pub fn new(stage: &str) -> Self {
        let label: String = stage
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        let success = format!("{MARKER} {label} Finished!");
        let error = format!("{MARKER} {label} Finished with ERROR!");
        let completion = Regex::new(&format!(
            r"(?m)^{} {} Finished(?: with ERROR)?!\r?$",
            regex::escape(MARKER),
            regex::escape(&label)
        ))
        .expect("sentinel pattern is built from escaped literals");
        Self {
            success,
            error,
            completion,
        }
    }

    pub fn success_line(&self) -> &str {
        &self.success
    }

    pub fn error_line(&self) -> &str {
        &self.error
    }

    /// Regex that matches as soon as either sentinel line has arrived.
    pub fn completion_regex(&self) -> &Regex {
        &self.completion
    }

    pub fn classify(&self, output: &str) -> SentinelVerdict {
        let mut saw_success = false;
        for line in output.lines() {
            let line = line.trim_end_matches('\r');
            if line == self.error {
                return SentinelVerdict::Failure;
            }
            if line == self.success {
                saw_success = true;
            }
        }
        if saw_success {
            SentinelVerdict::Success
        } else {
            SentinelVerdict::Incomplete
        }
    }
}

/// Accumulates shell output until a sentinel line completes it.
#[derive(Debug)]
pub struct ShellTranscript {
    sentinel: Sentinel,
    text: String,
}

impl ShellTranscript {
    pub fn new(sentinel: Sentinel) -> Self {
        Self {
            sentinel,
            text: String::new(),
        }
    }

    /// Append a chunk; returns the verdict once a sentinel line is complete.
    pub fn feed(&mut self, chunk: &str) -> Option<SentinelVerdict> {
        self.text.push_str(chunk);
        if self.sentinel.completion_regex().is_match(&self.text) {
            Some(self.sentinel.classify(&self.text))
        } else {
            None
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
