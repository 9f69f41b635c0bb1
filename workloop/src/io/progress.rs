//! Progress log (`.workloop/progress.md`).
//!
//! Plain, append-only markdown read back by the agent as working memory. The
//! controller only ever appends; nothing here parses the log.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

/// Trailing marker written by [`ProgressLog::mark_complete`].
pub const COMPLETE_MARKER: &str = "--- WORK ITEM COMPLETE ---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A finished, budget-consuming iteration.
    Iteration,
    /// Operator feedback given before the iteration ran.
    Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    /// For checkpoints, the iteration the feedback feeds into.
    pub iteration: u32,
    pub summary: String,
}

impl ProgressEntry {
    pub fn now(iteration: u32, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: EntryKind::Iteration,
            iteration,
            summary: summary.into(),
        }
    }

    pub fn checkpoint(next_iteration: u32, summary: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Checkpoint,
            ..Self::now(next_iteration, summary)
        }
    }

    fn render(&self) -> String {
        let stamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut buf = match self.kind {
            EntryKind::Iteration => format!("\n## Iteration {} ({stamp})\n\n", self.iteration),
            EntryKind::Checkpoint => format!(
                "\n## Checkpoint before iteration {} ({stamp})\n\n",
                self.iteration
            ),
        };
        buf.push_str(self.summary.trim_end());
        buf.push('\n');
        buf
    }
}

#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write the header. Leaves an existing log untouched.
    pub fn init(&self, label: &str) -> Result<()> {
        if self.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let header = format!(
            "# Progress: {label}\n\nStarted: {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        fs::write(&self.path, header)
            .with_context(|| format!("write progress log {}", self.path.display()))?;
        debug!(path = %self.path.display(), "progress log created");
        Ok(())
    }

    pub fn append(&self, entry: &ProgressEntry) -> Result<()> {
        self.append_raw(&entry.render())
    }

    pub fn mark_complete(&self) -> Result<()> {
        self.append_raw(&format!("\n{COMPLETE_MARKER}\n"))
    }

    /// Remove the log. Idempotent.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", self.path.display())),
        }
    }

    /// Copy the log into `dir` as `<item_id>-<timestamp>.md`. Returns `None` when
    /// there is no log to archive.
    pub fn archive(&self, dir: &Path, item_id: &str) -> Result<Option<PathBuf>> {
        if !self.exists() {
            return Ok(None);
        }
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let target = dir.join(format!("{item_id}-{stamp}.md"));
        fs::copy(&self.path, &target).with_context(|| {
            format!(
                "archive {} to {}",
                self.path.display(),
                target.display()
            )
        })?;
        debug!(target = %target.display(), "progress log archived");
        Ok(Some(target))
    }

    fn append_raw(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open progress log {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("append progress log {}", self.path.display()))
    }
}
