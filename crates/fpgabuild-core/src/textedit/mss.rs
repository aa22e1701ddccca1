//! `system.mss` regeneration.
//!
//! The software description is a flat list of `BEGIN <KIND>` / `END` blocks
//! of `PARAMETER NAME = VALUE` lines. Regeneration replaces the OS block of
//! every described processor and makes sure each has a PROCESSOR block.
//! Everything else (driver blocks, comments, blank lines) is kept verbatim.

use crate::domain::ProcessorDescriptor;

use super::{EditError, EditResult};

const MSS_VERSION: &str = "2.2.0";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Loose(String),
    Block { kind: String, body: Vec<String> },
}

fn parse(text: &str) -> EditResult<Vec<Item>> {
    let mut items = Vec::new();
    let mut open: Option<(usize, String, Vec<String>)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();
        let upper = trimmed.to_ascii_uppercase();

        if let Some(kind) = upper.strip_prefix("BEGIN ") {
            if let Some((start, _, _)) = &open {
                return Err(EditError::Parse {
                    line: line_no,
                    message: format!("BEGIN inside block opened at line {start}"),
                });
            }
            open = Some((line_no, kind.trim().to_string(), Vec::new()));
        } else if upper == "END" {
            let Some((_, kind, body)) = open.take() else {
                return Err(EditError::Parse {
                    line: line_no,
                    message: "END without BEGIN".to_string(),
                });
            };
            items.push(Item::Block { kind, body });
        } else if let Some((_, _, body)) = open.as_mut() {
            body.push(line.to_string());
        } else {
            items.push(Item::Loose(line.to_string()));
        }
    }

    if let Some((start, kind, _)) = open {
        return Err(EditError::Parse {
            line: start,
            message: format!("unterminated {kind} block"),
        });
    }
    Ok(items)
}

fn parameter<'a>(body: &'a [String], name: &str) -> Option<&'a str> {
    body.iter().find_map(|line| {
        let rest = line.trim().strip_prefix("PARAMETER ")?;
        let (key, value) = rest.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

fn os_block(proc: &ProcessorDescriptor, os_ver: Option<&str>) -> Item {
    let mut body = Vec::new();
    if proc.is_linux() {
        body.push(" PARAMETER OS_NAME = device-tree".to_string());
    } else {
        body.push(" PARAMETER OS_NAME = standalone".to_string());
    }
    if let Some(ver) = os_ver {
        body.push(format!(" PARAMETER OS_VER = {ver}"));
    }
    body.push(format!(" PARAMETER PROC_INSTANCE = {}", proc.instance));
    if proc.is_linux() {
        if !proc.console.is_empty() {
            body.push(format!(" PARAMETER console device = {}", proc.console));
        }
        if let Some(args) = proc.boot_args.as_deref().filter(|a| !a.is_empty()) {
            body.push(format!(" PARAMETER bootargs = {args}"));
        }
    } else if !proc.console.is_empty() {
        body.push(format!(" PARAMETER STDIN = {}", proc.console));
        body.push(format!(" PARAMETER STDOUT = {}", proc.console));
    }
    Item::Block {
        kind: "OS".to_string(),
        body,
    }
}

fn processor_block(proc: &ProcessorDescriptor) -> Item {
    Item::Block {
        kind: "PROCESSOR".to_string(),
        body: vec![
            " PARAMETER DRIVER_NAME = cpu".to_string(),
            format!(" PARAMETER HW_INSTANCE = {}", proc.instance),
            format!(" PARAMETER COMPILER = {}", proc.compiler()),
            format!(" PARAMETER ARCHIVER = {}ar", proc.cross_compile),
        ],
    }
}

fn block_matches(item: &Item, want_kind: &str, key: &str, instance: &str) -> bool {
    match item {
        Item::Block { kind, body } => {
            kind.eq_ignore_ascii_case(want_kind) && parameter(body, key) == Some(instance)
        }
        Item::Loose(_) => false,
    }
}

fn append(items: &mut Vec<Item>, block: Item) {
    if !matches!(items.last(), Some(Item::Loose(l)) if l.trim().is_empty()) {
        items.push(Item::Loose(String::new()));
    }
    items.push(block);
}

fn render(items: &[Item]) -> String {
    let mut out = String::new();
    for item in items {
        match item {
            Item::Loose(line) => {
                out.push_str(line);
                out.push('\n');
            }
            Item::Block { kind, body } => {
                out.push_str("BEGIN ");
                out.push_str(kind);
                out.push('\n');
                for line in body {
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str("END\n");
            }
        }
    }
    out
}

/// Regenerate the software description for `processors`.
///
/// `existing` is `None` when the file does not exist yet; a fresh header is
/// written in that case.
pub fn regenerate_mss(
    existing: Option<&str>,
    processors: &[ProcessorDescriptor],
) -> EditResult<String> {
    let mut items = match existing {
        Some(text) => parse(text)?,
        None => vec![
            Item::Loose(format!(" PARAMETER VERSION = {MSS_VERSION}")),
            Item::Loose(String::new()),
        ],
    };

    for proc in processors {
        let os_pos = items
            .iter()
            .position(|i| block_matches(i, "OS", "PROC_INSTANCE", &proc.instance));
        match os_pos {
            Some(pos) => {
                let os_ver = match &items[pos] {
                    Item::Block { body, .. } => parameter(body, "OS_VER").map(str::to_string),
                    Item::Loose(_) => None,
                };
                items[pos] = os_block(proc, os_ver.as_deref());
            }
            None => append(&mut items, os_block(proc, None)),
        }

        let has_cpu = items
            .iter()
            .any(|i| block_matches(i, "PROCESSOR", "HW_INSTANCE", &proc.instance));
        if !has_cpu {
            append(&mut items, processor_block(proc));
        }
    }

    Ok(render(&items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OsKind;

    fn standalone() -> ProcessorDescriptor {
        ProcessorDescriptor::new("microblaze_0", OsKind::Standalone).with_console("RS232_Uart_1")
    }

    fn linux() -> ProcessorDescriptor {
        let mut p = ProcessorDescriptor::new("microblaze_1", OsKind::Linux).with_console("uart_1");
        p.boot_args = Some("console=ttyUL0 root=/dev/ram".to_string());
        p
    }

    const EXISTING: &str = "\
 PARAMETER VERSION = 2.2.0


BEGIN OS
 PARAMETER OS_NAME = xilkernel
 PARAMETER OS_VER = 2.00.a
 PARAMETER PROC_INSTANCE = microblaze_0
END


BEGIN DRIVER
 PARAMETER DRIVER_NAME = uartlite
 PARAMETER HW_INSTANCE = RS232_Uart_1
END
";

    #[test]
    fn test_fresh_file_gets_header_and_blocks() {
        let text = regenerate_mss(None, &[standalone()]).unwrap();
        assert!(text.starts_with(" PARAMETER VERSION = 2.2.0\n"));
        assert!(text.contains(" PARAMETER OS_NAME = standalone\n"));
        assert!(text.contains(" PARAMETER STDIN = RS232_Uart_1\n"));
        assert!(text.contains(" PARAMETER HW_INSTANCE = microblaze_0\n"));
        assert!(text.contains(" PARAMETER COMPILER = mb-gcc\n"));
    }

    #[test]
    fn test_replaces_os_block_and_keeps_version() {
        let text = regenerate_mss(Some(EXISTING), &[standalone()]).unwrap();
        assert!(!text.contains("xilkernel"));
        assert!(text.contains(" PARAMETER OS_VER = 2.00.a\n"));
        assert!(text.contains("DRIVER_NAME = uartlite"));
        assert_eq!(text.matches("BEGIN OS").count(), 1);
    }

    #[test]
    fn test_linux_block_has_console_and_bootargs() {
        let text = regenerate_mss(Some(EXISTING), &[standalone(), linux()]).unwrap();
        assert!(text.contains(" PARAMETER OS_NAME = device-tree\n"));
        assert!(text.contains(" PARAMETER console device = uart_1\n"));
        assert!(text.contains(" PARAMETER bootargs = console=ttyUL0 root=/dev/ram\n"));
        assert_eq!(text.matches("BEGIN PROCESSOR").count(), 2);
    }

    #[test]
    fn test_regeneration_is_stable() {
        let once = regenerate_mss(Some(EXISTING), &[standalone()]).unwrap();
        let twice = regenerate_mss(Some(&once), &[standalone()]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unterminated_block_is_parse_error() {
        let err = regenerate_mss(Some("BEGIN OS\n PARAMETER OS_NAME = standalone\n"), &[])
            .unwrap_err();
        assert!(matches!(err, EditError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_stray_end_is_parse_error() {
        let err = regenerate_mss(Some("END\n"), &[]).unwrap_err();
        assert!(matches!(err, EditError::Parse { line: 1, .. }));
    }
}
