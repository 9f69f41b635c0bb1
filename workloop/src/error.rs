//! Typed failures the loop reacts to.
//!
//! Everything else travels as `anyhow::Error` with context strings; these types
//! are carried inside it and recovered with `downcast_ref` where the caller needs
//! to choose an exit code or a recovery path.

use std::path::PathBuf;

use thiserror::Error;

/// No usable work item source, or an invalid configuration. Fatal before the loop starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("no usable work-item source (create {dir} or configure [board])")]
    NoSource { dir: PathBuf },
    #[error(
        "conflicting work-item sources: {dir} exists and [board] is configured (set source.kind or pass --source)"
    )]
    ConflictingSources { dir: PathBuf },
    #[error("board source '{id}' has no adapter in this build (use --source files)")]
    BoardUnavailable { id: String },
    #[error("files source directory {dir} does not exist")]
    MissingFilesDir { dir: PathBuf },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Agent timed out, crashed or exited non-zero. The session is kept for resumption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("agent invocation failed for '{item_id}' at iteration {iteration}: {reason}")]
pub struct AgentInvocationError {
    pub item_id: String,
    pub iteration: u32,
    pub reason: String,
}

/// A work item document that cannot be parsed. The item is excluded from ranking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed work item {}: {reason}", path.display())]
pub struct MalformedWorkItemError {
    pub path: PathBuf,
    pub reason: String,
}

/// A collaborator side effect (branch, pull request, status write) failed.
/// Logged as a warning; never rolls back recorded progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {reason}")]
pub struct CollaboratorOperationError {
    pub operation: &'static str,
    pub reason: String,
}

impl CollaboratorOperationError {
    pub fn new(operation: &'static str, err: &anyhow::Error) -> Self {
        Self {
            operation,
            reason: format!("{err:#}"),
        }
    }
}
