//! Sentinel detection over free-form agent output.
//!
//! Two independent, line-anchored markers:
//!
//! - completion: `<promise>COMPLETE</promise>` alone on its line;
//! - checkpoint: `<checkpoint>DESCRIPTION</checkpoint>` alone on its line, with a
//!   non-empty description.
//!
//! Anchoring to whole lines keeps an agent that quotes the instructions back
//! ("print `<promise>COMPLETE</promise>` when done") from tripping either marker.

use std::sync::LazyLock;

use regex::Regex;

pub const COMPLETION_SENTINEL: &str = "<promise>COMPLETE</promise>";
pub const CHECKPOINT_OPEN: &str = "<checkpoint>";
pub const CHECKPOINT_CLOSE: &str = "</checkpoint>";

static COMPLETION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*<promise>COMPLETE</promise>[ \t]*\r?$")
        .expect("completion regex is valid")
});

static CHECKPOINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*<checkpoint>[ \t]*([^\r\n<>]*?\S)[ \t]*</checkpoint>[ \t]*\r?$")
        .expect("checkpoint regex is valid")
});

/// What the agent signalled in one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Agent is blocked awaiting human input.
    Checkpoint { description: String },
    /// Agent declared all work on the item complete.
    Complete,
    /// No sentinel present.
    Neither,
}

/// Inspect agent output. A checkpoint outranks completion.
pub fn detect(output: &str) -> Detection {
    if let Some(description) = checkpoint_description(output) {
        return Detection::Checkpoint { description };
    }
    if is_complete(output) {
        return Detection::Complete;
    }
    Detection::Neither
}

/// True if the completion sentinel appears alone on a line.
pub fn is_complete(output: &str) -> bool {
    COMPLETION_RE.is_match(output)
}

/// Description of the last well-formed checkpoint marker, if any.
pub fn checkpoint_description(output: &str) -> Option<String> {
    CHECKPOINT_RE
        .captures_iter(output)
        .last()
        .map(|caps| caps[1].trim().to_string())
}
