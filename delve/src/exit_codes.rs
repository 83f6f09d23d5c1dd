//! Stable exit codes for delve CLI commands.

/// Command succeeded, or the research run completed with a final answer.
pub const OK: i32 = 0;
/// Command failed due to invalid config/state or other errors.
pub const INVALID: i32 = 1;
/// The research run was cancelled and finished in the `stopped` status.
pub const STOPPED: i32 = 2;
