//! Test-only helpers: deterministic work items and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};

use crate::core::types::{ItemStatus, WorkItem};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::operator::Operator;
use crate::io::paths::WorkloopPaths;
use crate::io::vcs::Vcs;
use crate::io::work_items::WorkItemSource;

/// Fixed creation time used by every fixture item.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A deterministic work item with no priority.
pub fn work_item(id: &str, status: ItemStatus, content: &str) -> WorkItem {
    WorkItem {
        id: id.to_string(),
        title: format!("{id} title"),
        status,
        priority: None,
        created_at: fixed_time(),
        updated_at: fixed_time(),
        content: content.to_string(),
        source_ref: format!("{id}.md"),
    }
}

/// A work item whose checklist has `high_open` risky open tasks, `normal_open`
/// neutral open tasks and `checked` finished tasks.
pub fn checklist_item(
    id: &str,
    status: ItemStatus,
    high_open: usize,
    normal_open: usize,
    checked: usize,
) -> WorkItem {
    let mut content = String::new();
    for n in 0..high_open {
        content.push_str(&format!("- [ ] design module {n}\n"));
    }
    for n in 0..normal_open {
        content.push_str(&format!("- [ ] write tests {n}\n"));
    }
    for n in 0..checked {
        content.push_str(&format!("- [x] done step {n}\n"));
    }
    work_item(id, status, &content)
}

/// Render `item` as a file-source document.
pub fn item_document(item: &WorkItem) -> String {
    let mut doc = format!(
        "---\nid: {}\ntitle: {}\nstatus: {}\n",
        item.id,
        item.title,
        item.status.as_str()
    );
    if let Some(priority) = item.priority {
        doc.push_str(&format!("priority: {}\n", priority.as_str()));
    }
    doc.push_str(&format!(
        "created: {}\nupdated: {}\n---\n\n{}",
        item.created_at.to_rfc3339(),
        item.updated_at.to_rfc3339(),
        item.content
    ));
    doc
}

/// In-memory source with the same status rules as the file source.
#[derive(Debug, Default)]
pub struct MemorySource {
    items: RefCell<Vec<WorkItem>>,
}

impl MemorySource {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }

    pub fn items(&self) -> Vec<WorkItem> {
        self.items.borrow().clone()
    }

    pub fn status_of(&self, id: &str) -> Option<ItemStatus> {
        self.items
            .borrow()
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.status)
    }
}

impl WorkItemSource for MemorySource {
    fn list_items(&self) -> Result<Vec<WorkItem>> {
        Ok(self.items())
    }

    fn fetch(&self, id: &str) -> Result<Option<WorkItem>> {
        Ok(self.items.borrow().iter().find(|item| item.id == id).cloned())
    }

    fn set_status(&self, id: &str, status: ItemStatus) -> Result<()> {
        let mut items = self.items.borrow_mut();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| anyhow!("work item '{id}' not found"))?;
        if !item.status.can_advance_to(status) {
            return Err(anyhow!("refuse to regress '{id}'"));
        }
        item.status = status;
        Ok(())
    }
}

/// One canned agent response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(String),
    /// Overwrite a file (usually the work item), then return `output`.
    WriteThenOutput {
        path: PathBuf,
        contents: String,
        output: String,
    },
    Fail(String),
}

impl ScriptedReply {
    pub fn output(text: &str) -> Self {
        ScriptedReply::Output(text.to_string())
    }

    pub fn complete() -> Self {
        ScriptedReply::Output("all tasks verified\n<promise>COMPLETE</promise>\n".to_string())
    }

    pub fn checkpoint(description: &str) -> Self {
        ScriptedReply::Output(format!(
            "need a decision\n<checkpoint>{description}</checkpoint>\n"
        ))
    }
}

/// Agent that replays a queue of replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<ScriptedReply>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no replies left"))?;
        match reply {
            ScriptedReply::Output(text) => Ok(text),
            ScriptedReply::WriteThenOutput {
                path,
                contents,
                output,
            } => {
                fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
                Ok(output)
            }
            ScriptedReply::Fail(reason) => Err(anyhow!(reason)),
        }
    }
}

/// Operator with queued answers. Runs out into "continue" and "no feedback".
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    confirmations: RefCell<VecDeque<bool>>,
    feedback: RefCell<VecDeque<Option<String>>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new(confirmations: Vec<bool>, feedback: Vec<Option<&str>>) -> Self {
        Self {
            confirmations: RefCell::new(confirmations.into()),
            feedback: RefCell::new(
                feedback
                    .into_iter()
                    .map(|f| f.map(str::to_string))
                    .collect(),
            ),
            asked: RefCell::new(Vec::new()),
        }
    }

    /// Every question asked, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Operator for ScriptedOperator {
    fn confirm_continue(&self, next_iteration: u32) -> Result<bool> {
        self.asked
            .borrow_mut()
            .push(format!("continue {next_iteration}"));
        Ok(self.confirmations.borrow_mut().pop_front().unwrap_or(true))
    }

    fn checkpoint_feedback(&self, description: &str) -> Result<Option<String>> {
        self.asked
            .borrow_mut()
            .push(format!("checkpoint {description}"));
        Ok(self.feedback.borrow_mut().pop_front().flatten())
    }
}

/// VCS double that records calls instead of touching git.
#[derive(Debug, Default)]
pub struct RecordingVcs {
    calls: RefCell<Vec<String>>,
    fail_pull_requests: bool,
}

impl RecordingVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_pull_requests() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            fail_pull_requests: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Vcs for RecordingVcs {
    fn prepare_branch(&self, item: &WorkItem) -> Result<Option<String>> {
        self.calls.borrow_mut().push(format!("branch {}", item.id));
        Ok(Some(format!("workloop/{}", item.id)))
    }

    fn open_pull_request(&self, item: &WorkItem, branch: Option<&str>) -> Result<()> {
        self.calls.borrow_mut().push(format!(
            "pr {} {}",
            item.id,
            branch.unwrap_or("-")
        ));
        if self.fail_pull_requests {
            return Err(anyhow!("remote rejected"));
        }
        Ok(())
    }
}

/// Temporary working directory with an initialised `.workloop/specs`.
#[derive(Debug)]
pub struct TestWorkspace {
    temp: tempfile::TempDir,
    paths: WorkloopPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = WorkloopPaths::new(temp.path());
        fs::create_dir_all(&paths.default_specs_dir).with_context(|| {
            format!("create {}", paths.default_specs_dir.display())
        })?;
        Ok(Self { temp, paths })
    }

    /// Workspace inside a fresh git repository with one commit. `None` when git
    /// is not installed.
    pub fn with_git() -> Result<Option<Self>> {
        let available = Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success());
        if !available {
            return Ok(None);
        }
        let ws = Self::new()?;
        ws.git(&["init", "--quiet"])?;
        ws.git(&["config", "user.email", "workloop@example.com"])?;
        ws.git(&["config", "user.name", "workloop"])?;
        ws.git(&["commit", "--quiet", "--allow-empty", "-m", "init"])?;
        Ok(Some(ws))
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &WorkloopPaths {
        &self.paths
    }

    /// Write `item` into the specs directory as `<id>.md` and return its path.
    pub fn write_item(&self, item: &WorkItem) -> Result<PathBuf> {
        let path = self.paths.default_specs_dir.join(format!("{}.md", item.id));
        fs::write(&path, item_document(item))
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }
}
