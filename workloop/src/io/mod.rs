//! Side effects: filesystem state, subprocesses and collaborators.

pub mod agent;
pub mod config;
pub mod frontmatter;
pub mod git;
pub mod lock;
pub mod operator;
pub mod paths;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod session;
pub mod vcs;
pub mod work_items;
