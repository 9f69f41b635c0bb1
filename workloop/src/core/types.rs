//! Shared deterministic types for work loop core logic.
//!
//! These types define stable contracts between the ranking engine, the
//! work item sources and the loop controller. They carry no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::checklist::parse_checklist;

/// Lifecycle status of a work item.
///
/// Transitions only move forward: `todo -> in-progress -> done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Todo,
    InProgress,
    Done,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Todo => "todo",
            ItemStatus::InProgress => "in-progress",
            ItemStatus::Done => "done",
        }
    }

    /// True for statuses the ranking engine may select.
    pub fn is_actionable(self) -> bool {
        matches!(self, ItemStatus::Todo | ItemStatus::InProgress)
    }

    /// True if moving from `self` to `next` does not regress the lifecycle.
    pub fn can_advance_to(self, next: ItemStatus) -> bool {
        next.stage() >= self.stage()
    }

    fn stage(self) -> u8 {
        match self {
            ItemStatus::Todo => 0,
            ItemStatus::InProgress => 1,
            ItemStatus::Done => 2,
        }
    }
}

/// Optional priority metadata. Declaration order is sort order (high first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Parse a priority label, case-insensitively.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Checklist lines extracted from a work item body, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskList {
    /// Text of `- [ ]` lines.
    pub open: Vec<String>,
    /// Text of `- [x]` lines.
    pub checked: Vec<String>,
}

impl TaskList {
    pub fn total(&self) -> usize {
        self.open.len() + self.checked.len()
    }

    pub fn completed(&self) -> usize {
        self.checked.len()
    }
}

/// A unit of declared, checklist-bearing work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Stable slug, unique within its source.
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub priority: Option<Priority>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-text body holding the checklist.
    pub content: String,
    /// Opaque locator back to the originating store. Never interpreted by the core.
    pub source_ref: String,
}

impl WorkItem {
    /// Checklist parsed from `content`. This is the only basis for progress and risk.
    pub fn tasks(&self) -> TaskList {
        parse_checklist(&self.content)
    }

    /// Human label used in progress headers and prompts.
    pub fn label(&self) -> String {
        format!("{}: {}", self.id, self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        assert!(ItemStatus::Todo.can_advance_to(ItemStatus::InProgress));
        assert!(ItemStatus::InProgress.can_advance_to(ItemStatus::Done));
        assert!(ItemStatus::Done.can_advance_to(ItemStatus::Done));
        assert!(!ItemStatus::Done.can_advance_to(ItemStatus::Todo));
        assert!(!ItemStatus::InProgress.can_advance_to(ItemStatus::Todo));
    }

    #[test]
    fn priority_orders_high_first() {
        let mut priorities = vec![Priority::Low, Priority::High, Priority::Medium];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::High, Priority::Medium, Priority::Low]
        );
        assert_eq!(Priority::parse(" HIGH "), Some(Priority::High));
        assert_eq!(Priority::parse("urgent"), None);
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&ItemStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in-progress\"");
    }
}
