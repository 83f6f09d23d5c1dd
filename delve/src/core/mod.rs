//! Deterministic, pure logic shared by the research core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod findings;
pub mod invariants;
pub mod lineage;
pub mod spawn;
pub mod summary;
pub mod transitions;
pub mod types;
