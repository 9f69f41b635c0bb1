//! Stable exit codes for workloop CLI commands.

/// Command succeeded, or the run completed its work.
pub const OK: i32 = 0;
/// Invalid configuration, agent failure or any other error.
pub const INVALID: i32 = 1;
/// No actionable work item was available.
pub const NO_WORK: i32 = 2;
/// The iteration budget ran out with the item still open. The session is kept.
pub const MAX_ITERATIONS: i32 = 3;
/// The operator stopped the run. The session is kept.
pub const CANCELLED: i32 = 4;
