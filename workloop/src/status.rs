//! `workloop status` report.

use std::fmt;

use anyhow::Result;

use crate::core::ranking::RiskPolicy;
use crate::io::paths::WorkloopPaths;
use crate::io::progress::ProgressLog;
use crate::io::session::{Session, SessionStore};
use crate::io::work_items::WorkItemSource;
use crate::select::next_candidate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextItem {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub session: Option<Session>,
    pub progress_log: bool,
    pub locked: bool,
    /// What selection would pick next. Only looked up without a session.
    pub next: Option<NextItem>,
    /// Why the source could not be consulted, if it could not.
    pub source_problem: Option<String>,
}

/// Gather the report. A missing or misconfigured source is reported, not fatal.
pub fn status_report<S: WorkItemSource + ?Sized>(
    paths: &WorkloopPaths,
    source: Result<&S>,
    policy: &RiskPolicy,
) -> StatusReport {
    let session = SessionStore::new(&paths.session_path).load();
    let mut report = StatusReport {
        progress_log: ProgressLog::new(&paths.progress_path).exists(),
        locked: paths.lock_path.exists(),
        session,
        next: None,
        source_problem: None,
    };
    if report.session.is_some() {
        return report;
    }
    match source.and_then(|source| next_candidate(source, policy)) {
        Ok(next) => {
            report.next = next.map(|item| NextItem {
                id: item.id,
                title: item.title,
            });
        }
        Err(err) => report.source_problem = Some(format!("{err:#}")),
    }
    report
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(session) => {
                writeln!(f, "session:    {} ({})", session.item_id, session.item_title)?;
                writeln!(
                    f,
                    "branch:     {}",
                    session.branch_ref.as_deref().unwrap_or("-")
                )?;
                writeln!(f, "started:    {}", session.started_at.to_rfc3339())?;
                writeln!(f, "iterations: {}", session.iteration_count)?;
                writeln!(
                    f,
                    "tasks:      {}/{} ({}%)",
                    session.completed_tasks,
                    session.total_tasks,
                    session.progress_percent()
                )?;
            }
            None => writeln!(f, "session:    none")?,
        }
        writeln!(
            f,
            "progress:   {}",
            if self.progress_log { "present" } else { "none" }
        )?;
        if self.locked {
            writeln!(f, "lock:       held (a run is active, or stale: `workloop reset`)")?;
        }
        if let Some(next) = &self.next {
            writeln!(f, "next:       {} ({})", next.id, next.title)?;
        } else if let Some(problem) = &self.source_problem {
            writeln!(f, "next:       unavailable: {problem}")?;
        } else if self.session.is_none() {
            writeln!(f, "next:       no actionable work items")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ItemStatus;
    use crate::io::session::NewSession;
    use crate::test_support::{MemorySource, TestWorkspace, work_item};
    use anyhow::anyhow;

    #[test]
    fn reports_next_item_without_session() {
        let ws = TestWorkspace::new().expect("workspace");
        let source = MemorySource::new(vec![work_item("a", ItemStatus::Todo, "- [ ] x\n")]);
        let report = status_report(ws.paths(), Ok(&source), &RiskPolicy::default());

        assert_eq!(report.session, None);
        assert_eq!(
            report.next,
            Some(NextItem {
                id: "a".to_string(),
                title: "a title".to_string()
            })
        );
        assert!(report.to_string().contains("next:       a (a title)"));
    }

    #[test]
    fn reports_session_progress_and_source_problems() {
        let ws = TestWorkspace::new().expect("workspace");
        SessionStore::new(&ws.paths().session_path)
            .init(NewSession {
                item_id: "a".to_string(),
                item_title: "A".to_string(),
                branch_ref: None,
                content: Some("- [x] one\n- [ ] two\n".to_string()),
            })
            .expect("init");
        let report =
            status_report::<MemorySource>(ws.paths(), Err(anyhow!("no source")), &RiskPolicy::default());
        let text = report.to_string();
        assert!(text.contains("session:    a (A)"));
        assert!(text.contains("tasks:      1/2 (50%)"));
        assert_eq!(report.source_problem, None);

        SessionStore::new(&ws.paths().session_path)
            .clear()
            .expect("clear");
        let report =
            status_report::<MemorySource>(ws.paths(), Err(anyhow!("no source")), &RiskPolicy::default());
        assert_eq!(report.source_problem.as_deref(), Some("no source"));
        assert!(report.to_string().contains("unavailable: no source"));
    }
}
