//! Recursive research orchestrator.
//!
//! A research run grows a tree of questions. A decision authority decides
//! which questions to open and curates a findings ledger; node workers answer
//! individual questions with a search/reflect/conclude loop. The scheduler
//! owns the state and enforces the guardrails (node budget, depth, fan-out,
//! concurrency, wall-clock time) independently of what the authority asks for.
//!
//! - **[`core`]**: pure, deterministic logic (spawn planning, ledger merge,
//!   node transitions, invariants). No I/O.
//! - **[`io`]**: config, state persistence, process execution, prompts.
//! - **[`agents`]**: the collaborator seams and their implementations.
//! - **[`scheduler`]**: the control loop tying them together.
//!
//! Orchestration modules ([`start`], [`validate`]) implement the CLI commands.

pub mod agents;
pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod scheduler;
pub mod start;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
