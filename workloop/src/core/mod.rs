//! Deterministic, pure logic shared by the work loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod checklist;
pub mod machine;
pub mod ranking;
pub mod sentinel;
pub mod types;
