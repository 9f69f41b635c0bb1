//! Work item loop runner.
//!
//! Selects a work item, hands it to an external coding agent, interprets the
//! agent's output and persists enough state to resume after any exit. The crate
//! keeps a strict split:
//!
//! - **[`core`]**: pure, deterministic logic (ranking, sentinel detection,
//!   loop transitions). No I/O.
//! - **[`io`]**: filesystem state, subprocesses and collaborator traits,
//!   isolated so tests can script them.
//!
//! [`controller`] composes both into the loop; [`select`], [`status`] and
//! [`init`] back the remaining CLI commands.

pub mod controller;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod init;
pub mod io;
pub mod logging;
pub mod select;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
