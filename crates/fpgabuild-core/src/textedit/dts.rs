//! Device tree source patches applied before a kernel build.

use regex::Regex;
use tracing::debug;

use crate::domain::ProcessorDescriptor;

use super::{EditError, EditResult};

fn lines_of(text: &str) -> Vec<String> {
    text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect()
}

fn join_lines(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Net brace depth change of one line, ignoring quoted strings and `//` comments.
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    let mut prev = '\0';
    for c in line.chars() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '/' if !in_string && prev == '/' => break,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
        prev = c;
    }
    delta
}

fn check_balanced(lines: &[String]) -> EditResult<()> {
    let mut depth = 0;
    for (idx, line) in lines.iter().enumerate() {
        depth += brace_delta(line);
        if depth < 0 {
            return Err(EditError::Parse {
                line: idx + 1,
                message: "closing brace without matching open".to_string(),
            });
        }
    }
    if depth != 0 {
        return Err(EditError::Parse {
            line: lines.len(),
            message: format!("{depth} unclosed brace(s)"),
        });
    }
    Ok(())
}

fn regex(pattern: &str) -> EditResult<Regex> {
    Regex::new(pattern).map_err(|e| EditError::InvalidValue {
        field: "pattern",
        value: e.to_string(),
    })
}

/// Set the kernel command line in the `chosen` node, creating the node under
/// the root when it does not exist.
pub fn set_boot_args(text: &str, args: &str) -> EditResult<String> {
    let mut lines = lines_of(text);
    check_balanced(&lines)?;
    let escaped = args.replace('\\', "\\\\").replace('"', "\\\"");

    let existing = regex(r"^\s*bootargs\s*=.*;\s*$")?;
    if let Some(pos) = lines.iter().position(|l| existing.is_match(l)) {
        let indent = indent_of(&lines[pos]).to_string();
        lines[pos] = format!("{indent}bootargs = \"{escaped}\";");
        return Ok(join_lines(&lines));
    }

    let chosen = regex(r"^\s*chosen\s*\{")?;
    if let Some(pos) = lines.iter().position(|l| chosen.is_match(l)) {
        let indent = format!("{}\t", indent_of(&lines[pos]));
        lines.insert(pos + 1, format!("{indent}bootargs = \"{escaped}\";"));
        return Ok(join_lines(&lines));
    }

    let root = regex(r"^\s*/\s*\{")?;
    let Some(pos) = lines.iter().position(|l| root.is_match(l)) else {
        return Err(EditError::NotFound("device tree root node".to_string()));
    };
    let indent = format!("{}\t", indent_of(&lines[pos]));
    let block = [
        format!("{indent}chosen {{"),
        format!("{indent}\tbootargs = \"{escaped}\";"),
        format!("{indent}}};"),
    ];
    for (offset, line) in block.into_iter().enumerate() {
        lines.insert(pos + 1 + offset, line);
    }
    Ok(join_lines(&lines))
}

fn mac_octets(mac: &str) -> EditResult<Vec<String>> {
    let octets: Vec<&str> = mac.split([':', '-']).collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(EditError::InvalidValue {
            field: "mac_address",
            value: mac.to_string(),
        });
    }
    Ok(octets.iter().map(|o| o.to_ascii_lowercase()).collect())
}

/// Replace every `local-mac-address` property with `mac`.
pub fn patch_mac(text: &str, mac: &str) -> EditResult<String> {
    let octets = mac_octets(mac)?;
    let mut lines = lines_of(text);
    let property = regex(r"^\s*local-mac-address\s*=\s*\[[^\]]*\]\s*;")?;

    let mut patched = 0;
    for line in lines.iter_mut() {
        if property.is_match(line) {
            let indent = indent_of(line).to_string();
            *line = format!("{indent}local-mac-address = [ {} ];", octets.join(" "));
            patched += 1;
        }
    }
    if patched == 0 {
        return Err(EditError::NotFound("local-mac-address property".to_string()));
    }
    Ok(join_lines(&lines))
}

fn node_header(name: &str) -> EditResult<Regex> {
    let name = regex::escape(name);
    regex(&format!(
        r"^\s*(?:(?:[A-Za-z_][\w-]*:\s*)?{name}(?:@[0-9A-Fa-f,]+)?|{name}:\s*[^\s{{]+)\s*\{{"
    ))
}

/// Remove the named nodes (by node name, `name@unit`, or label) with their
/// whole subtree. Names that do not occur are ignored.
pub fn prune_nodes(text: &str, nodes: &[String]) -> EditResult<String> {
    let mut lines = lines_of(text);
    check_balanced(&lines)?;

    for name in nodes {
        let header = node_header(name)?;
        let Some(start) = lines.iter().position(|l| header.is_match(l)) else {
            debug!(node = %name, "node not present, nothing to prune");
            continue;
        };
        let mut depth = 0;
        let mut end = None;
        for (offset, line) in lines[start..].iter().enumerate() {
            depth += brace_delta(line);
            if depth <= 0 {
                end = Some(start + offset);
                break;
            }
        }
        let Some(end) = end else {
            return Err(EditError::Parse {
                line: start + 1,
                message: format!("node {name} is not closed"),
            });
        };
        lines.drain(start..=end);
        debug!(node = %name, lines = end - start + 1, "pruned node");
    }
    Ok(join_lines(&lines))
}

/// All configured device tree patches for one processor, in order: boot
/// arguments, MAC address, node pruning.
pub fn apply_device_tree_edits(text: &str, proc: &ProcessorDescriptor) -> EditResult<String> {
    let mut out = text.to_string();
    if let Some(args) = proc.boot_args.as_deref().filter(|a| !a.is_empty()) {
        out = set_boot_args(&out, args)?;
    }
    if let Some(mac) = proc.mac_address.as_deref().filter(|m| !m.is_empty()) {
        out = patch_mac(&out, mac)?;
    }
    if !proc.prune_nodes.is_empty() {
        out = prune_nodes(&out, &proc.prune_nodes)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OsKind;

    const DTS: &str = "\
/dts-v1/;
/ {
\t#address-cells = <1>;
\tchosen {
\t\tbootargs = \"console=ttyS0\";
\t};
\tplb: plb@0 {
\t\tEthernet_MAC: ethernet@81c00000 {
\t\t\tlocal-mac-address = [ 02 00 00 00 00 00 ];
\t\t\tphy-handle = <&phy0>;
\t\t};
\t\txps_timer_1: timer@83c00000 {
\t\t\tcompatible = \"xlnx,xps-timer-1.00.a\";
\t\t};
\t};
};
";

    #[test]
    fn test_replaces_existing_bootargs() {
        let out = set_boot_args(DTS, "console=ttyUL0 ip=on").unwrap();
        assert!(out.contains("\t\tbootargs = \"console=ttyUL0 ip=on\";\n"));
        assert!(!out.contains("ttyS0"));
    }

    #[test]
    fn test_creates_chosen_node() {
        let src = "/ {\n\tmodel = \"ml505\";\n};\n";
        let out = set_boot_args(src, "console=ttyUL0").unwrap();
        assert_eq!(
            out,
            "/ {\n\tchosen {\n\t\tbootargs = \"console=ttyUL0\";\n\t};\n\tmodel = \"ml505\";\n};\n"
        );
    }

    #[test]
    fn test_bootargs_without_root_fails() {
        let err = set_boot_args("/dts-v1/;\n", "x").unwrap_err();
        assert!(matches!(err, EditError::NotFound(_)));
    }

    #[test]
    fn test_patch_mac() {
        let out = patch_mac(DTS, "00:0A:35:00:00:01").unwrap();
        assert!(out.contains("local-mac-address = [ 00 0a 35 00 00 01 ];"));
        assert!(patch_mac(DTS, "00:0a:35").is_err());
        assert!(matches!(
            patch_mac("/ {\n};\n", "00:0a:35:00:00:01"),
            Err(EditError::NotFound(_))
        ));
    }

    #[test]
    fn test_prune_by_label_and_unit_name() {
        let out = prune_nodes(DTS, &["xps_timer_1".to_string()]).unwrap();
        assert!(!out.contains("timer@83c00000"));
        assert!(!out.contains("xps-timer"));
        assert!(out.contains("ethernet@81c00000"));

        let out = prune_nodes(DTS, &["ethernet".to_string()]).unwrap();
        assert!(!out.contains("local-mac-address"));
        assert!(out.contains("timer@83c00000"));
        assert!(check_balanced(&lines_of(&out)).is_ok());
    }

    #[test]
    fn test_prune_missing_node_is_noop() {
        let out = prune_nodes(DTS, &["spi_0".to_string()]).unwrap();
        assert_eq!(out, DTS);
    }

    #[test]
    fn test_unbalanced_input_is_rejected() {
        let err = prune_nodes("/ {\n\tchosen {\n};\n", &["chosen".to_string()]).unwrap_err();
        assert!(matches!(err, EditError::Parse { .. }));
    }

    #[test]
    fn test_apply_all_edits() {
        let mut proc = ProcessorDescriptor::new("microblaze_0", OsKind::Linux);
        proc.boot_args = Some("console=ttyUL0".to_string());
        proc.mac_address = Some("00-0a-35-00-00-07".to_string());
        proc.prune_nodes = vec!["xps_timer_1".to_string()];
        let out = apply_device_tree_edits(DTS, &proc).unwrap();
        assert!(out.contains("bootargs = \"console=ttyUL0\";"));
        assert!(out.contains("[ 00 0a 35 00 00 07 ]"));
        assert!(!out.contains("xps_timer_1"));
    }
}
