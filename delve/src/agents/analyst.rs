//! Analyst seam: the reflect and conclude steps of a node worker.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::researcher::WorkerContext;
use crate::state::{Confidence, Followup, SearchEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionVerdict {
    /// Search again, ideally with `next_query`.
    Continue,
    /// Enough evidence. Honored only after the minimum number of searches.
    Done,
    /// Further searching is pointless. Honored immediately.
    DeadEnd,
}

/// Judgment after one search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    pub verdict: ReflectionVerdict,
    #[serde(default)]
    pub next_query: Option<String>,
    #[serde(default)]
    pub note: String,
}

impl Reflection {
    pub fn carry_on(next_query: Option<String>, note: impl Into<String>) -> Self {
        Self {
            verdict: ReflectionVerdict::Continue,
            next_query,
            note: note.into(),
        }
    }
}

/// Terminal answer for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    pub answer: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub suggested_followups: Vec<Followup>,
}

/// Evaluates search evidence for one node.
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Judge the history so far. The latest search is the last entry.
    async fn reflect(&self, ctx: &WorkerContext, history: &[SearchEntry]) -> Result<Reflection>;

    /// Produce the node's answer from its full search history.
    async fn conclude(
        &self,
        ctx: &WorkerContext,
        history: &[SearchEntry],
        max_followups: usize,
    ) -> Result<Conclusion>;
}
