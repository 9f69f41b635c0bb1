//! Loop controller: the only component with control flow.
//!
//! One run walks the state machine in [`crate::core::machine`]:
//!
//! ```text
//! SelectingItem -> AwaitingAgent -> ProcessingResult -> Continuing       -> SelectingItem
//!                                                    -> CheckpointPaused -> AwaitingAgent
//!                                                    -> Completed        -> SelectingItem (chained)
//!                                                    -> MaxIterationsReached
//! ```
//!
//! Selection always reuses an existing session and re-fetches its item, so
//! edits made to the work item between iterations are picked up. Session and
//! progress log are only ever mutated here.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::machine::{LoopOutcome, LoopState, LoopStop, Verdict, judge};
use crate::core::ranking::RiskPolicy;
use crate::core::types::{ItemStatus, WorkItem};
use crate::error::{AgentInvocationError, CollaboratorOperationError};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::config::WorkloopConfig;
use crate::io::lock::RunLock;
use crate::io::operator::Operator;
use crate::io::paths::WorkloopPaths;
use crate::io::progress::{ProgressEntry, ProgressLog};
use crate::io::prompt::{PromptInputs, render_iteration_prompt};
use crate::io::session::{NewSession, Session, SessionStore};
use crate::io::vcs::Vcs;
use crate::io::work_items::WorkItemSource;
use crate::select::{ActiveItem, next_candidate, resume_active};

const SUMMARY_MAX_CHARS: usize = 200;

/// Human in the loop (confirm between iterations) or away from keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Interactive,
    Autonomous,
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub mode: RunMode,
    /// Budget-consuming iterations this run may execute, across chained items.
    pub max_iterations: u32,
    /// Move on to the next item after a completion while budget remains.
    pub chain: bool,
    pub agent_timeout: Duration,
    pub output_limit_bytes: usize,
    pub archive_progress: bool,
    pub policy: RiskPolicy,
}

impl LoopOptions {
    pub fn from_config(config: &WorkloopConfig, mode: RunMode) -> Self {
        Self {
            mode,
            max_iterations: config.max_iterations,
            chain: true,
            agent_timeout: Duration::from_secs(config.agent.timeout_secs),
            output_limit_bytes: config.agent.output_limit_bytes,
            archive_progress: config.progress.archive,
            policy: config.ranking.policy(),
        }
    }
}

/// Result of `workloop plan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    NoWork,
    Planned(Session),
}

pub struct LoopController<'a, S, A, V, O>
where
    S: WorkItemSource + ?Sized,
    V: Vcs + ?Sized,
{
    paths: WorkloopPaths,
    source: &'a S,
    agent: &'a A,
    vcs: &'a V,
    operator: &'a O,
    sessions: SessionStore,
    progress: ProgressLog,
    options: LoopOptions,
}

/// Mutable bookkeeping for one run.
struct RunState {
    state: LoopState,
    active: Option<ActiveItem>,
    output: String,
    checkpoint: Option<String>,
    iterations_run: u32,
    completed: Vec<String>,
}

impl RunState {
    fn finish(self, stop: LoopStop) -> LoopOutcome {
        info!(
            stop = ?stop.state(),
            iterations_run = self.iterations_run,
            completed = self.completed.len(),
            "loop finished"
        );
        LoopOutcome {
            iterations_run: self.iterations_run,
            completed: self.completed,
            stop,
        }
    }

    fn active(&self) -> Result<&ActiveItem> {
        self.active
            .as_ref()
            .ok_or_else(|| anyhow!("no active work item in state {:?}", self.state))
    }
}

impl<'a, S, A, V, O> LoopController<'a, S, A, V, O>
where
    S: WorkItemSource + ?Sized,
    A: Agent,
    V: Vcs + ?Sized,
    O: Operator,
{
    pub fn new(
        paths: &WorkloopPaths,
        source: &'a S,
        agent: &'a A,
        vcs: &'a V,
        operator: &'a O,
        options: LoopOptions,
    ) -> Self {
        Self {
            paths: paths.clone(),
            source,
            agent,
            vcs,
            operator,
            sessions: SessionStore::new(&paths.session_path),
            progress: ProgressLog::new(&paths.progress_path),
            options,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn progress_log(&self) -> &ProgressLog {
        &self.progress
    }

    /// Run until the work runs out, the budget is spent, the operator stops us or
    /// the agent fails.
    #[instrument(skip_all, fields(mode = ?self.options.mode, max_iterations = self.options.max_iterations))]
    pub fn run(&self) -> Result<LoopOutcome> {
        let _lock = RunLock::acquire(&self.paths.lock_path)?;
        if self.options.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }

        let mut run = RunState {
            state: LoopState::SelectingItem,
            active: None,
            output: String::new(),
            checkpoint: None,
            iterations_run: 0,
            completed: Vec::new(),
        };

        loop {
            debug!(state = ?run.state, "loop transition");
            match run.state {
                LoopState::SelectingItem => match self.select()? {
                    Some(active) => {
                        run.active = Some(active);
                        run.state = LoopState::AwaitingAgent;
                    }
                    None if run.completed.is_empty() => {
                        return Ok(run.finish(LoopStop::NoWorkAvailable));
                    }
                    None => return Ok(run.finish(LoopStop::Completed)),
                },
                LoopState::AwaitingAgent => {
                    let active = run.active()?;
                    match self.invoke_agent(active) {
                        Ok(output) => {
                            run.output = output;
                            run.state = LoopState::ProcessingResult;
                        }
                        Err(failure) => {
                            error!(err = %failure, "agent invocation failed; session kept");
                            return Ok(run.finish(LoopStop::Failed(failure)));
                        }
                    }
                }
                LoopState::ProcessingResult => {
                    let verdict = judge(
                        &run.output,
                        run.iterations_run,
                        self.options.max_iterations,
                    );
                    run.state = verdict.next_state();
                    match verdict {
                        Verdict::Checkpoint { description } => {
                            info!(%description, "agent paused at checkpoint");
                            run.checkpoint = Some(description);
                        }
                        Verdict::Complete => {
                            run.iterations_run += 1;
                        }
                        Verdict::Continue | Verdict::BudgetExhausted => {
                            let summary = summarize(&run.output);
                            let active = run
                                .active
                                .as_mut()
                                .ok_or_else(|| anyhow!("no active work item to record"))?;
                            self.record_iteration(active, &summary)?;
                            run.iterations_run += 1;
                        }
                    }
                }
                LoopState::CheckpointPaused => {
                    let description = run.checkpoint.take().unwrap_or_default();
                    let active = run.active()?;
                    match self.operator.checkpoint_feedback(&description)? {
                        Some(feedback) => {
                            self.progress.append(&ProgressEntry::checkpoint(
                                active.session.iteration_count + 1,
                                format!("Checkpoint: {description}\nFeedback: {feedback}"),
                            ))?;
                            run.state = LoopState::AwaitingAgent;
                        }
                        None => {
                            let item_id = active.item.id.clone();
                            return Ok(run.finish(LoopStop::UserCancelled { item_id }));
                        }
                    }
                }
                LoopState::Continuing => {
                    if self.options.mode == RunMode::Interactive {
                        let active = run.active()?;
                        let next = active.session.iteration_count + 1;
                        if !self.operator.confirm_continue(next)? {
                            let item_id = active.item.id.clone();
                            return Ok(run.finish(LoopStop::UserCancelled { item_id }));
                        }
                    }
                    run.state = LoopState::SelectingItem;
                }
                LoopState::Completed => {
                    let active = run
                        .active
                        .take()
                        .ok_or_else(|| anyhow!("no active work item to complete"))?;
                    self.complete(&active)?;
                    run.completed.push(active.item.id);

                    if !self.options.chain || run.iterations_run >= self.options.max_iterations {
                        return Ok(run.finish(LoopStop::Completed));
                    }
                    if self.options.mode == RunMode::Interactive
                        && !self.operator.confirm_continue(1)?
                    {
                        return Ok(run.finish(LoopStop::Completed));
                    }
                    run.state = LoopState::SelectingItem;
                }
                LoopState::MaxIterationsReached => {
                    let active = run.active()?;
                    let stop = LoopStop::MaxIterationsReached {
                        item_id: active.item.id.clone(),
                        iteration_count: active.session.iteration_count,
                    };
                    warn!(item_id = %active.item.id, "iteration budget spent; session kept");
                    return Ok(run.finish(stop));
                }
                LoopState::NoWorkAvailable | LoopState::UserCancelled | LoopState::Failed => {
                    return Err(anyhow!("no transition out of {:?}", run.state));
                }
            }
        }
    }

    /// Commit to a work item without running the agent.
    ///
    /// With `item_id` that item is used; otherwise the ranking picks. An existing
    /// session is only replaced when `force` is set.
    #[instrument(skip_all, fields(item_id = item_id.unwrap_or("-"), force))]
    pub fn plan(&self, item_id: Option<&str>, force: bool) -> Result<PlanOutcome> {
        let _lock = RunLock::acquire(&self.paths.lock_path)?;
        if let Some(existing) = self.sessions.load() {
            if !force {
                return Err(anyhow!(
                    "a session is already active for '{}' (use --force to replace it)",
                    existing.item_id
                ));
            }
            info!(item_id = %existing.item_id, "replacing active session");
            self.sessions.clear()?;
            self.progress.delete()?;
        }

        let item = match item_id {
            Some(id) => {
                let item = self
                    .source
                    .fetch(id)
                    .with_context(|| format!("fetch work item '{id}'"))?
                    .ok_or_else(|| anyhow!("work item '{id}' not found"))?;
                if !item.status.is_actionable() {
                    return Err(anyhow!("work item '{id}' is already done"));
                }
                item
            }
            None => match next_candidate(self.source, &self.options.policy)? {
                Some(item) => item,
                None => return Ok(PlanOutcome::NoWork),
            },
        };
        let active = self.start_session(item)?;
        Ok(PlanOutcome::Planned(active.session))
    }

    fn select(&self) -> Result<Option<ActiveItem>> {
        if let Some(active) = resume_active(self.source, &self.sessions, &self.progress)? {
            return Ok(Some(active));
        }
        match next_candidate(self.source, &self.options.policy)? {
            Some(item) => self.start_session(item).map(Some),
            None => Ok(None),
        }
    }

    /// Prepare the branch, advance the item to in-progress and create the session.
    #[instrument(skip_all, fields(item_id = %item.id))]
    fn start_session(&self, mut item: WorkItem) -> Result<ActiveItem> {
        let branch = match self.vcs.prepare_branch(&item) {
            Ok(branch) => branch,
            Err(err) => {
                let failure = CollaboratorOperationError::new("prepare branch", &err);
                warn!(err = %failure, "continuing without a branch");
                None
            }
        };
        if item.status == ItemStatus::Todo {
            match self.source.set_status(&item.id, ItemStatus::InProgress) {
                Ok(()) => item.status = ItemStatus::InProgress,
                Err(err) => {
                    let failure = CollaboratorOperationError::new("mark in-progress", &err);
                    warn!(err = %failure, "work item status unchanged");
                }
            }
        }
        let session = self.sessions.init(NewSession::for_item(&item, branch))?;
        info!(title = %item.title, "session started");
        Ok(ActiveItem { session, item })
    }

    fn invoke_agent(&self, active: &ActiveItem) -> std::result::Result<String, AgentInvocationError> {
        let iteration = active.session.iteration_count + 1;
        let failure = |err: anyhow::Error| match err.downcast_ref::<AgentInvocationError>() {
            Some(typed) => typed.clone(),
            None => AgentInvocationError {
                item_id: active.item.id.clone(),
                iteration,
                reason: format!("{err:#}"),
            },
        };

        self.progress
            .init(&active.item.label())
            .map_err(failure)?;
        let prompt = render_iteration_prompt(&PromptInputs {
            item: &active.item,
            progress_path: self.progress.path(),
            branch: active.session.branch_ref.as_deref(),
            iteration,
        })
        .map_err(failure)?;

        info!(item_id = %active.item.id, iteration, "awaiting agent");
        self.agent
            .invoke(&AgentRequest {
                workdir: self.paths.root.clone(),
                prompt,
                timeout: self.options.agent_timeout,
                output_limit_bytes: self.options.output_limit_bytes,
                item_id: active.item.id.clone(),
                iteration,
            })
            .map_err(failure)
    }

    fn record_iteration(&self, active: &mut ActiveItem, summary: &str) -> Result<()> {
        let count = self.sessions.increment_iteration()?;
        if count == 0 {
            return Err(anyhow!(
                "session for '{}' disappeared during the iteration",
                active.item.id
            ));
        }
        self.progress.append(&ProgressEntry::now(count, summary))?;
        active.session.iteration_count = count;
        info!(item_id = %active.item.id, iteration_count = count, "iteration recorded");
        Ok(())
    }

    /// Record completion. The status write must succeed; the pull request is
    /// best effort.
    #[instrument(skip_all, fields(item_id = %active.item.id))]
    fn complete(&self, active: &ActiveItem) -> Result<()> {
        self.source
            .set_status(&active.item.id, ItemStatus::Done)
            .with_context(|| format!("mark work item '{}' done", active.item.id))?;

        if let Err(err) = self
            .vcs
            .open_pull_request(&active.item, active.session.branch_ref.as_deref())
        {
            let failure = CollaboratorOperationError::new("open pull request", &err);
            warn!(err = %failure, "completion kept without pull request");
        }

        self.progress.mark_complete()?;
        if self.options.archive_progress
            && let Some(archived) = self
                .progress
                .archive(&self.paths.archive_dir, &active.item.id)?
        {
            debug!(path = %archived.display(), "progress archived");
        }
        self.progress.delete()?;
        self.sessions.clear()?;
        info!("work item complete");
        Ok(())
    }
}

/// Last non-empty output line, capped at [`SUMMARY_MAX_CHARS`] characters.
pub fn summarize(output: &str) -> String {
    let Some(line) = output.lines().map(str::trim).rfind(|line| !line.is_empty()) else {
        return "(no output)".to_string();
    };
    if line.chars().count() <= SUMMARY_MAX_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    cut.push_str("...");
    cut
}
