//! Selection helpers shared by `workloop plan`, `rank`, `status` and the loop.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::ranking::{RiskPolicy, progress};
use crate::core::types::{ItemStatus, Priority, WorkItem};
use crate::io::progress::ProgressLog;
use crate::io::session::{Session, SessionPatch, SessionStore};
use crate::io::work_items::WorkItemSource;

/// The active session together with a freshly fetched copy of its item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveItem {
    pub session: Session,
    pub item: WorkItem,
}

/// One line of `workloop rank`.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub priority: Option<Priority>,
    pub risk: f64,
    pub progress: u8,
}

/// Resume the current session, if it still points at actionable work.
///
/// The item is always re-fetched from the source and the session's cache is
/// refreshed from it. A session whose item vanished or is already done is
/// cleared together with the progress log.
pub fn resume_active<S: WorkItemSource + ?Sized>(
    source: &S,
    sessions: &SessionStore,
    progress_log: &ProgressLog,
) -> Result<Option<ActiveItem>> {
    let Some(session) = sessions.load() else {
        return Ok(None);
    };
    let fetched = source
        .fetch(&session.item_id)
        .with_context(|| format!("fetch work item '{}'", session.item_id))?;
    let item = match fetched {
        Some(item) if item.status != ItemStatus::Done => item,
        other => {
            let reason = if other.is_some() { "already done" } else { "missing from source" };
            warn!(item_id = %session.item_id, reason, "discarding stale session");
            sessions.clear()?;
            progress_log.delete()?;
            return Ok(None);
        }
    };
    let session = sessions
        .update(SessionPatch::refresh_from(&item))?
        .unwrap_or(session);
    debug!(item_id = %item.id, iteration_count = session.iteration_count, "resuming session");
    Ok(Some(ActiveItem { session, item }))
}

/// The item the ranking would pick next, ignoring any session.
pub fn next_candidate<S: WorkItemSource + ?Sized>(
    source: &S,
    policy: &RiskPolicy,
) -> Result<Option<WorkItem>> {
    let items = source.list_items().context("list work items")?;
    Ok(policy.select_next(&items).cloned())
}

/// Actionable items in selection order.
pub fn rank_items<S: WorkItemSource + ?Sized>(
    source: &S,
    policy: &RiskPolicy,
) -> Result<Vec<RankedRow>> {
    let items = source.list_items().context("list work items")?;
    Ok(policy
        .rank(&items)
        .into_iter()
        .map(|ranked| RankedRow {
            id: ranked.item.id.clone(),
            title: ranked.item.title.clone(),
            status: ranked.item.status,
            priority: ranked.item.priority,
            risk: ranked.risk,
            progress: progress(ranked.item),
        })
        .collect())
}
