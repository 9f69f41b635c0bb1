//! Deterministic ranking of work items.
//!
//! Items whose remaining tasks are architecturally risky are preferred so that
//! failures surface early. The keyword sets are policy, not a classifier: they
//! default to the lists below and can be replaced through configuration.

use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::core::types::{ItemStatus, Priority, WorkItem};

pub const DEFAULT_HIGH_RISK_KEYWORDS: &[&str] = &[
    "architecture",
    "schema",
    "design",
    "integration",
    "api",
    "contract",
    "spike",
    "unknown",
    "core",
    "abstraction",
    "foundation",
    "refactor",
];

pub const DEFAULT_LOW_RISK_KEYWORDS: &[&str] = &[
    "polish", "fix", "cleanup", "style", "typo", "docs", "ui", "button", "tweak",
];

static DEFAULT_POLICY: LazyLock<RiskPolicy> = LazyLock::new(RiskPolicy::default);

/// Risk class of a single task line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskClass {
    High,
    Normal,
    Low,
}

/// Keyword sets used to classify task text. Matching is case-insensitive substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskPolicy {
    high: Vec<String>,
    low: Vec<String>,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_RISK_KEYWORDS, DEFAULT_LOW_RISK_KEYWORDS)
    }
}

/// An actionable item together with the metrics it was ranked by.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem<'a> {
    pub item: &'a WorkItem,
    pub risk: f64,
    pub progress: u8,
}

impl RiskPolicy {
    pub fn new<S: AsRef<str>>(high: &[S], low: &[S]) -> Self {
        let normalize = |words: &[S]| -> Vec<String> {
            words
                .iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            high: normalize(high),
            low: normalize(low),
        }
    }

    /// Classify a task line. High-risk keywords take precedence over low-risk ones.
    pub fn classify(&self, text: &str) -> RiskClass {
        let lowered = text.to_lowercase();
        if self.high.iter().any(|k| lowered.contains(k.as_str())) {
            RiskClass::High
        } else if self.low.iter().any(|k| lowered.contains(k.as_str())) {
            RiskClass::Low
        } else {
            RiskClass::Normal
        }
    }

    /// Fraction of the item's open tasks classified high. Zero open tasks yields 0.
    pub fn risk_ratio(&self, item: &WorkItem) -> f64 {
        let tasks = item.tasks();
        if tasks.open.is_empty() {
            return 0.0;
        }
        let high = tasks
            .open
            .iter()
            .filter(|task| self.classify(task) == RiskClass::High)
            .count();
        high as f64 / tasks.open.len() as f64
    }

    /// Actionable items (todo or in-progress) in selection order.
    pub fn rank<'a>(&self, items: &'a [WorkItem]) -> Vec<RankedItem<'a>> {
        let mut ranked: Vec<RankedItem<'a>> = items
            .iter()
            .filter(|item| item.status.is_actionable())
            .map(|item| RankedItem {
                item,
                risk: self.risk_ratio(item),
                progress: progress(item),
            })
            .collect();
        ranked.sort_by(compare_ranked);
        ranked
    }

    /// The highest ranked actionable item, if any.
    pub fn select_next<'a>(&self, items: &'a [WorkItem]) -> Option<&'a WorkItem> {
        self.rank(items).first().map(|ranked| ranked.item)
    }
}

/// Classify with the default keyword sets.
pub fn classify_task(text: &str) -> RiskClass {
    DEFAULT_POLICY.classify(text)
}

/// Risk ratio with the default keyword sets.
pub fn risk_ratio(item: &WorkItem) -> f64 {
    DEFAULT_POLICY.risk_ratio(item)
}

/// Percent of checklist lines checked, rounded. An item without a checklist is 100.
pub fn progress(item: &WorkItem) -> u8 {
    let tasks = item.tasks();
    let total = tasks.total();
    if total == 0 {
        return 100;
    }
    let pct = (tasks.completed() as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Select with the default keyword sets.
pub fn select_next(items: &[WorkItem]) -> Option<&WorkItem> {
    DEFAULT_POLICY.select_next(items)
}

/// Selection order, each criterion breaking ties in the previous one:
/// in-progress before todo, higher risk, priority (absent last), higher
/// progress, earlier creation, then id so the order is total.
fn compare_ranked(a: &RankedItem<'_>, b: &RankedItem<'_>) -> Ordering {
    status_rank(a.item.status)
        .cmp(&status_rank(b.item.status))
        .then_with(|| b.risk.total_cmp(&a.risk))
        .then_with(|| priority_rank(a.item.priority).cmp(&priority_rank(b.item.priority)))
        .then_with(|| b.progress.cmp(&a.progress))
        .then_with(|| a.item.created_at.cmp(&b.item.created_at))
        .then_with(|| a.item.id.cmp(&b.item.id))
}

fn status_rank(status: ItemStatus) -> u8 {
    match status {
        ItemStatus::InProgress => 0,
        _ => 1,
    }
}

fn priority_rank(priority: Option<Priority>) -> u8 {
    match priority {
        Some(Priority::High) => 0,
        Some(Priority::Medium) => 1,
        Some(Priority::Low) => 2,
        None => 3,
    }
}
