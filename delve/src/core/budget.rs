//! Wall-clock budget for a research run.
//!
//! Uses tokio's clock so tests can pause and advance time.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Instant,
}

impl Budget {
    /// Start a budget of `max_time` from the current instant.
    pub fn starting_now(max_time: Duration) -> Self {
        Self {
            deadline: Instant::now() + max_time,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
