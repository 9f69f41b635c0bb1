//! Checklist line grammar for work item bodies.
//!
//! Exactly two forms are recognized, optionally indented:
//! open `- [ ] text` and checked `- [x] text` (`x` in either case).

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::TaskList;

static CHECKLIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*- \[([ xX])\][ \t]+(\S.*?)[ \t]*\r?$").expect("checklist regex is valid")
});

/// Split `content` into open and checked task lines.
pub fn parse_checklist(content: &str) -> TaskList {
    let mut tasks = TaskList::default();
    for line in content.lines() {
        let Some(caps) = CHECKLIST_RE.captures(line) else {
            continue;
        };
        let text = caps[2].to_string();
        if &caps[1] == " " {
            tasks.open.push(text);
        } else {
            tasks.checked.push(text);
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_and_checked_lines() {
        let body = "# Tasks\n\n- [ ] design schema\n- [x] write docs\n- [X] fix typo\n  - [ ] nested item\n";
        let tasks = parse_checklist(body);
        assert_eq!(tasks.open, vec!["design schema", "nested item"]);
        assert_eq!(tasks.checked, vec!["write docs", "fix typo"]);
        assert_eq!(tasks.total(), 4);
        assert_eq!(tasks.completed(), 2);
    }

    #[test]
    fn ignores_other_bullet_forms() {
        let body = "* [ ] star bullet\n- [] missing space\n- [y] unknown mark\n-[ ] no space\n- plain bullet\n- [ ]\n";
        assert_eq!(parse_checklist(body), TaskList::default());
    }

    #[test]
    fn handles_crlf_line_endings() {
        let tasks = parse_checklist("- [ ] one\r\n- [x] two\r\n");
        assert_eq!(tasks.open, vec!["one"]);
        assert_eq!(tasks.checked, vec!["two"]);
    }
}
