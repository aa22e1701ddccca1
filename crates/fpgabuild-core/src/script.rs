//! Stage script generation for remote execution.
//!
//! A stage script changes to its working directory, echoes the command it is
//! about to run, runs it, and echoes one of two sentinel lines depending on
//! the exit status. Output is a pure function of the inputs so generated
//! scripts can be diffed between runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::HostOs;
use crate::session::{Sentinel, ToolInvocation};

/// Shell dialect of a generated script.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDialect {
    /// POSIX `sh`.
    Posix,
    /// Windows `cmd.exe` batch.
    Batch,
}

impl ScriptDialect {
    /// Dialect of the build server's OS, which is not necessarily ours.
    pub fn for_host(os: HostOs) -> Self {
        match os {
            HostOs::Linux => ScriptDialect::Posix,
            HostOs::Windows => ScriptDialect::Batch,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ScriptDialect::Posix => "sh",
            ScriptDialect::Batch => "bat",
        }
    }

    fn line_ending(&self) -> &'static str {
        match self {
            ScriptDialect::Posix => "\n",
            ScriptDialect::Batch => "\r\n",
        }
    }
}

/// A rendered script ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageScript {
    pub file_name: String,
    pub text: String,
    /// Hex SHA-256 of `text`.
    pub digest: String,
}

fn is_posix_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c)
}

/// Quote one word for `sh`. Safe words pass through unchanged.
pub fn quote_posix(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_posix_safe) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Quote one word for `cmd.exe`. Safe words pass through unchanged.
pub fn quote_batch(word: &str) -> String {
    let needs_quotes = word.is_empty()
        || word
            .chars()
            .any(|c| c.is_whitespace() || "&|<>^(),;=\"".contains(c));
    if needs_quotes {
        format!("\"{}\"", word.replace('"', "\"\""))
    } else {
        word.to_string()
    }
}

/// Make text safe as the argument of a batch `echo`.
fn escape_batch_echo(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '^' | '&' | '|' | '<' | '>' | '(' | ')' => {
                out.push('^');
                out.push(c);
            }
            '%' => out.push_str("%%"),
            _ => out.push(c),
        }
    }
    out
}

/// Program plus quoted arguments as one command line.
pub fn render_command_line(program: &str, args: &[String], dialect: ScriptDialect) -> String {
    let quote: fn(&str) -> String = match dialect {
        ScriptDialect::Posix => quote_posix,
        ScriptDialect::Batch => quote_batch,
    };
    std::iter::once(quote(program))
        .chain(args.iter().map(|a| quote(a)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders stage scripts for one host OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptBuilder {
    dialect: ScriptDialect,
}

impl ScriptBuilder {
    pub fn new(dialect: ScriptDialect) -> Self {
        Self { dialect }
    }

    pub fn for_host(os: HostOs) -> Self {
        Self::new(ScriptDialect::for_host(os))
    }

    pub fn dialect(&self) -> ScriptDialect {
        self.dialect
    }

    pub fn file_name(&self, stage: &str) -> String {
        format!("{}.{}", stage, self.dialect.extension())
    }

    /// Render the script text for one stage.
    pub fn build_stage_script(
        &self,
        stage: &str,
        target_dir: &str,
        command_line: &str,
        on_error: &str,
        on_success: &str,
    ) -> String {
        let lines: Vec<String> = match self.dialect {
            ScriptDialect::Posix => vec![
                "#!/bin/sh".to_string(),
                format!("# fpgabuild stage: {stage}"),
                format!(
                    "cd {} || {{ echo {}; exit 1; }}",
                    quote_posix(target_dir),
                    quote_posix(on_error)
                ),
                format!("echo {}", quote_posix(command_line)),
                command_line.to_string(),
                "status=$?".to_string(),
                "if [ \"$status\" -eq 0 ]; then".to_string(),
                format!("    echo {}", quote_posix(on_success)),
                "else".to_string(),
                "    echo \"exit status $status\"".to_string(),
                format!("    echo {}", quote_posix(on_error)),
                "fi".to_string(),
                "exit $status".to_string(),
            ],
            ScriptDialect::Batch => vec![
                "@echo off".to_string(),
                format!("rem fpgabuild stage: {stage}"),
                format!(
                    "cd /d {} || (echo {} & exit /b 1)",
                    quote_batch(target_dir),
                    escape_batch_echo(on_error)
                ),
                format!("echo {}", escape_batch_echo(command_line)),
                format!("call {command_line}"),
                "if errorlevel 1 (".to_string(),
                format!("    echo {}", escape_batch_echo(on_error)),
                "    exit /b 1".to_string(),
                ")".to_string(),
                format!("echo {}", escape_batch_echo(on_success)),
                "exit /b 0".to_string(),
            ],
        };
        let eol = self.dialect.line_ending();
        let mut text = lines.join(eol);
        text.push_str(eol);
        text
    }

    /// Render the script for an invocation with its stage's sentinels.
    pub fn render(&self, invocation: &ToolInvocation, sentinel: &Sentinel) -> StageScript {
        let text = self.build_stage_script(
            &invocation.stage,
            &invocation.workdir,
            &invocation.command_line(self.dialect),
            sentinel.error_line(),
            sentinel.success_line(),
        );
        StageScript {
            file_name: self.file_name(&invocation.stage),
            digest: hex::encode(Sha256::digest(text.as_bytes())),
            text,
        }
    }

    /// Command that marks an uploaded script executable, if the host needs one.
    pub fn chmod_command(&self, script_path: &str) -> Option<String> {
        match self.dialect {
            ScriptDialect::Posix => Some(format!("chmod +x {}", quote_posix(script_path))),
            ScriptDialect::Batch => None,
        }
    }

    /// Line typed into the interactive shell to run a script with its output
    /// redirected to `log_path`, then print the log tail carrying the sentinel.
    pub fn launch_command(&self, script_path: &str, log_path: &str) -> String {
        match self.dialect {
            ScriptDialect::Posix => format!(
                "{} > {} 2>&1; tail -n 5 {}",
                quote_posix(script_path),
                quote_posix(log_path),
                quote_posix(log_path)
            ),
            ScriptDialect::Batch => format!(
                "call {} > {} 2>&1 & type {}",
                quote_batch(script_path),
                quote_batch(log_path),
                quote_batch(log_path)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn invocation() -> ToolInvocation {
        ToolInvocation::new(
            "ngdbuild",
            "ngdbuild",
            "/work/fpga0/implementation",
            Duration::from_secs(600),
        )
        .args(["-p", "xc5vlx110tff1136-1", "-uc", "system.ucf", "system.ngc"])
    }

    #[test]
    fn test_quote_posix() {
        assert_eq!(quote_posix("system.ngd"), "system.ngd");
        assert_eq!(quote_posix("a b"), "'a b'");
        assert_eq!(quote_posix("it's"), "'it'\\''s'");
        assert_eq!(quote_posix(""), "''");
    }

    #[test]
    fn test_quote_batch() {
        assert_eq!(quote_batch("C:\\work\\fpga0"), "C:\\work\\fpga0");
        assert_eq!(quote_batch("C:\\Program Files"), "\"C:\\Program Files\"");
    }

    #[test]
    fn test_render_is_deterministic() {
        let builder = ScriptBuilder::new(ScriptDialect::Posix);
        let sentinel = Sentinel::new("ngdbuild");
        let a = builder.render(&invocation(), &sentinel);
        let b = builder.render(&invocation(), &Sentinel::new("ngdbuild"));
        assert_eq!(a.text, b.text);
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.file_name, "ngdbuild.sh");
    }

    #[test]
    fn test_posix_script_shape() {
        let builder = ScriptBuilder::new(ScriptDialect::Posix);
        let sentinel = Sentinel::new("ngdbuild");
        let script = builder.render(&invocation(), &sentinel);
        let lines: Vec<&str> = script.text.lines().collect();
        assert_eq!(lines[0], "#!/bin/sh");
        assert!(lines[2].starts_with("cd /work/fpga0/implementation ||"));
        assert!(lines.contains(&"ngdbuild -p xc5vlx110tff1136-1 -uc system.ucf system.ngc"));
        assert!(script.text.contains(sentinel.success_line()));
        assert!(script.text.contains(sentinel.error_line()));
        // The sentinels only ever appear as echo arguments, never at line start.
        assert!(!sentinel.completion_regex().is_match(&script.text));
    }

    #[test]
    fn test_batch_script_shape() {
        let builder = ScriptBuilder::for_host(HostOs::Windows);
        let inv = ToolInvocation::new(
            "bitgen",
            "bitgen",
            "C:\\work\\fpga0\\implementation",
            Duration::from_secs(60),
        )
        .args(["-w", "-f", "bitgen.ut", "system"]);
        let script = builder.render(&inv, &Sentinel::new("bitgen"));
        assert_eq!(script.file_name, "bitgen.bat");
        assert!(script.text.starts_with("@echo off\r\n"));
        assert!(script.text.contains("call bitgen -w -f bitgen.ut system\r\n"));
        assert!(script.text.contains("if errorlevel 1 ("));
    }

    #[test]
    fn test_chmod_and_launch() {
        let posix = ScriptBuilder::new(ScriptDialect::Posix);
        assert_eq!(
            posix.chmod_command("/w/map.sh").as_deref(),
            Some("chmod +x /w/map.sh")
        );
        assert_eq!(
            posix.launch_command("/w/map.sh", "/w/map.out"),
            "/w/map.sh > /w/map.out 2>&1; tail -n 5 /w/map.out"
        );
        let batch = ScriptBuilder::new(ScriptDialect::Batch);
        assert!(batch.chmod_command("C:\\w\\map.bat").is_none());
    }
}
