//! Header block handling for work item documents.
//!
//! A document starts with `---`, a block of `key: value` lines, and a closing
//! `---`. Edits only touch the keys they name so human formatting survives.

/// Split a document into (header, body). Returns `None` when there is no header block.
pub fn split_frontmatter(contents: &str) -> Option<(&str, &str)> {
    let after = contents
        .strip_prefix("---\n")
        .or_else(|| contents.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in after.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let header = &after[..offset];
            let body = &after[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Set `key` to `value` in a header block, replacing every existing `key:` line
/// with a single one (kept at the first occurrence) or appending it.
pub fn upsert_field(header: &str, key: &str, value: &str) -> String {
    let mut lines = Vec::new();
    let mut saw_key = false;

    for line in header.lines() {
        if let Some((existing, _)) = line.split_once(':')
            && !line.starts_with([' ', '\t'])
            && existing.trim() == key
        {
            if !saw_key {
                lines.push(format!("{key}: {value}"));
                saw_key = true;
            }
            continue;
        }
        lines.push(line.to_string());
    }

    if !saw_key {
        lines.push(format!("{key}: {value}"));
    }

    let mut buf = lines.join("\n");
    buf.push('\n');
    buf
}

/// Reassemble a document from a header block and body.
pub fn render_frontmatter(header: &str, body: &str) -> String {
    let mut buf = String::new();
    buf.push_str("---\n");
    buf.push_str(header.trim_end());
    buf.push('\n');
    buf.push_str("---\n");
    buf.push_str(body);
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf
}
