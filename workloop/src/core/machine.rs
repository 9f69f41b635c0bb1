//! Pure transition rules for the loop controller.
//!
//! The controller owns all side effects; this module only decides which state
//! follows an agent result and how a run ends.

use crate::core::sentinel::{Detection, detect};
use crate::error::AgentInvocationError;

/// States of one loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    SelectingItem,
    AwaitingAgent,
    ProcessingResult,
    Continuing,
    CheckpointPaused,
    NoWorkAvailable,
    Completed,
    MaxIterationsReached,
    UserCancelled,
    Failed,
}

/// Transition chosen after the agent returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Ask the human, then re-run the agent. Does not consume budget.
    Checkpoint { description: String },
    /// Item finished.
    Complete,
    /// Iteration counted; budget remains.
    Continue,
    /// Iteration counted; budget is now spent.
    BudgetExhausted,
}

impl Verdict {
    pub fn next_state(&self) -> LoopState {
        match self {
            Verdict::Checkpoint { .. } => LoopState::CheckpointPaused,
            Verdict::Complete => LoopState::Completed,
            Verdict::Continue => LoopState::Continuing,
            Verdict::BudgetExhausted => LoopState::MaxIterationsReached,
        }
    }
}

/// Judge an agent output.
///
/// `iterations_run` counts budget-consuming iterations finished before this one.
pub fn judge(output: &str, iterations_run: u32, max_iterations: u32) -> Verdict {
    match detect(output) {
        Detection::Checkpoint { description } => Verdict::Checkpoint { description },
        Detection::Complete => Verdict::Complete,
        Detection::Neither if iterations_run.saturating_add(1) >= max_iterations => {
            Verdict::BudgetExhausted
        }
        Detection::Neither => Verdict::Continue,
    }
}

/// Reason why a loop run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Nothing actionable when the run began.
    NoWorkAvailable,
    /// At least one item completed and the run ended (no more work, budget spent,
    /// or the operator declined to chain).
    Completed,
    /// Budget spent while an item was still open. The session is kept.
    MaxIterationsReached { item_id: String, iteration_count: u32 },
    /// Operator declined to continue. The session is kept.
    UserCancelled { item_id: String },
    /// Agent invocation failed. The session is kept.
    Failed(AgentInvocationError),
}

impl LoopStop {
    pub fn state(&self) -> LoopState {
        match self {
            LoopStop::NoWorkAvailable => LoopState::NoWorkAvailable,
            LoopStop::Completed => LoopState::Completed,
            LoopStop::MaxIterationsReached { .. } => LoopState::MaxIterationsReached,
            LoopStop::UserCancelled { .. } => LoopState::UserCancelled,
            LoopStop::Failed(_) => LoopState::Failed,
        }
    }
}

/// Summary of one loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Budget-consuming iterations executed by this run, across chained items.
    pub iterations_run: u32,
    /// Items completed by this run, in order.
    pub completed: Vec<String>,
    pub stop: LoopStop,
}
