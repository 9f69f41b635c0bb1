//! Version-control collaborator: branch preparation when a session starts and a
//! pull request when an item completes.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::types::WorkItem;
use crate::io::config::VcsConfig;
use crate::io::git::Git;

pub trait Vcs {
    /// Make sure work for `item` happens on its own branch. Returns the branch
    /// reference to record in the session, or `None` when not applicable.
    fn prepare_branch(&self, item: &WorkItem) -> Result<Option<String>>;

    /// Request a pull request for a completed item.
    fn open_pull_request(&self, item: &WorkItem, branch: Option<&str>) -> Result<()>;
}

/// No version control. Every operation is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVcs;

impl Vcs for NoVcs {
    fn prepare_branch(&self, _item: &WorkItem) -> Result<Option<String>> {
        Ok(None)
    }

    fn open_pull_request(&self, _item: &WorkItem, _branch: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// `git` for branches, `gh` for pull requests.
#[derive(Debug, Clone)]
pub struct GitVcs {
    git: Git,
    branch_prefix: String,
    open_pull_request: bool,
}

impl GitVcs {
    pub fn new(workdir: impl Into<PathBuf>, config: &VcsConfig) -> Self {
        Self {
            git: Git::new(workdir),
            branch_prefix: config.branch_prefix.clone(),
            open_pull_request: config.open_pull_request,
        }
    }

    pub fn branch_name(&self, item: &WorkItem) -> String {
        format!("{}{}", self.branch_prefix, item.id)
    }
}

impl Vcs for GitVcs {
    #[instrument(skip_all, fields(item_id = %item.id))]
    fn prepare_branch(&self, item: &WorkItem) -> Result<Option<String>> {
        if !self.git.is_repository() {
            debug!("not a git repository, skipping branch");
            return Ok(None);
        }
        let branch = self.branch_name(item);
        if self.git.current_branch().ok().as_deref() == Some(branch.as_str()) {
            return Ok(Some(branch));
        }
        if self.git.branch_exists(&branch)? {
            self.git.checkout_branch(&branch)?;
        } else {
            self.git.checkout_new_branch(&branch)?;
        }
        info!(branch = %branch, "work item branch ready");
        Ok(Some(branch))
    }

    #[instrument(skip_all, fields(item_id = %item.id))]
    fn open_pull_request(&self, item: &WorkItem, branch: Option<&str>) -> Result<()> {
        if !self.open_pull_request {
            return Ok(());
        }
        let Some(branch) = branch else {
            debug!("no branch recorded, skipping pull request");
            return Ok(());
        };
        self.git.push_upstream(branch)?;

        let body = format!(
            "Completes work item `{}`.\n\nSource: `{}`\n",
            item.id, item.source_ref
        );
        let output = Command::new("gh")
            .args(["pr", "create", "--head", branch, "--title", &item.title, "--body", &body])
            .current_dir(self.git.workdir())
            .output()
            .context("spawn gh pr create")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("gh pr create failed: {}", stderr.trim()));
        }
        info!(
            url = %String::from_utf8_lossy(&output.stdout).trim(),
            "pull request opened"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ItemStatus;
    use crate::test_support::{TestWorkspace, work_item};

    #[test]
    fn branch_name_uses_prefix() {
        let vcs = GitVcs::new(".", &VcsConfig::default());
        let item = work_item("auth-api", ItemStatus::Todo, "");
        assert_eq!(vcs.branch_name(&item), "workloop/auth-api");
    }

    #[test]
    fn outside_repository_prepares_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = GitVcs::new(temp.path(), &VcsConfig::default());
        let item = work_item("a", ItemStatus::Todo, "");
        assert_eq!(vcs.prepare_branch(&item).expect("prepare"), None);
    }

    #[test]
    fn prepare_branch_is_idempotent() {
        let Some(ws) = TestWorkspace::with_git().expect("workspace") else {
            return;
        };
        let vcs = GitVcs::new(ws.path(), &VcsConfig::default());
        let item = work_item("a", ItemStatus::Todo, "");

        let first = vcs.prepare_branch(&item).expect("prepare");
        let second = vcs.prepare_branch(&item).expect("prepare again");
        assert_eq!(first.as_deref(), Some("workloop/a"));
        assert_eq!(second, first);
        assert_eq!(
            Git::new(ws.path()).current_branch().expect("branch"),
            "workloop/a"
        );
    }

    #[test]
    fn disabled_pull_requests_skip_everything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = VcsConfig {
            open_pull_request: false,
            ..VcsConfig::default()
        };
        let vcs = GitVcs::new(temp.path(), &config);
        let item = work_item("a", ItemStatus::Done, "");
        vcs.open_pull_request(&item, Some("workloop/a"))
            .expect("no-op");
    }
}
