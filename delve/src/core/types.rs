//! Shared deterministic types for the research core.
//!
//! These are the contracts between the scheduler, the decision authority, and
//! the workers. They carry no I/O and are validated before reaching the pure
//! merge and planning functions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{Confidence, FindingSource, Followup, NodeId, NodeOutcome, SearchEntry};

/// Hard limits enforced regardless of what the decision authority requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_nodes: usize,
    pub max_concurrency: usize,
    pub max_time: Duration,
    /// Deepest allowed node (roots are depth 0).
    pub max_depth: u32,
    pub max_spawn_per_decision: usize,
    pub min_searches: u32,
    pub max_searches: u32,
    pub max_followups: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_nodes: 12,
            max_concurrency: 3,
            max_time: Duration::from_secs(10 * 60),
            max_depth: 3,
            max_spawn_per_decision: 3,
            min_searches: 3,
            max_searches: 6,
            max_followups: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Spawn,
    Done,
}

/// A node the decision authority wants created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub question: String,
    pub reason: String,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
}

/// Keyed ledger instruction. `add` and `update` upsert, `remove` deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FindingUpdate {
    Add {
        key: String,
        title: String,
        content: String,
        #[serde(default)]
        confidence: Option<Confidence>,
        #[serde(default)]
        sources: Vec<FindingSource>,
    },
    Update {
        key: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        confidence: Option<Confidence>,
        #[serde(default)]
        sources: Option<Vec<FindingSource>>,
    },
    Remove {
        key: String,
    },
}

impl FindingUpdate {
    pub fn key(&self) -> &str {
        match self {
            FindingUpdate::Add { key, .. }
            | FindingUpdate::Update { key, .. }
            | FindingUpdate::Remove { key } => key,
        }
    }
}

/// Output of one `evaluate` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub reasoning: String,
    #[serde(rename = "decision")]
    pub verdict: Verdict,
    #[serde(default)]
    pub nodes_to_spawn: Vec<SpawnRequest>,
    #[serde(default)]
    pub findings_updates: Vec<FindingUpdate>,
}

impl Decision {
    pub fn done(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            verdict: Verdict::Done,
            nodes_to_spawn: Vec::new(),
            findings_updates: Vec::new(),
        }
    }

    pub fn spawn(reasoning: impl Into<String>, nodes: Vec<SpawnRequest>) -> Self {
        Self {
            reasoning: reasoning.into(),
            verdict: Verdict::Spawn,
            nodes_to_spawn: nodes,
            findings_updates: Vec::new(),
        }
    }

    pub fn with_updates(mut self, updates: Vec<FindingUpdate>) -> Self {
        self.findings_updates = updates;
        self
    }
}

/// Terminal payload for a node, produced by a worker or a scheduler fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResolution {
    pub answer: String,
    pub confidence: Confidence,
    pub outcome: NodeOutcome,
    pub suggested_followups: Vec<Followup>,
    pub search_history: Vec<SearchEntry>,
}

pub const STOPPED_NODE_ANSWER: &str = "Research stopped before this question was resolved.";
pub const SKIPPED_NODE_ANSWER: &str =
    "Not investigated: the run ended before this question was launched.";

impl NodeResolution {
    /// Fixed result for a worker that observed cancellation.
    pub fn stopped(search_history: Vec<SearchEntry>) -> Self {
        Self {
            answer: STOPPED_NODE_ANSWER.to_string(),
            confidence: Confidence::Low,
            outcome: NodeOutcome::Stopped,
            suggested_followups: Vec::new(),
            search_history,
        }
    }

    /// Fallback for a worker that errored or panicked.
    pub fn failed(error: &str, search_history: Vec<SearchEntry>) -> Self {
        Self {
            answer: format!("Research failed: {error}"),
            confidence: Confidence::Low,
            outcome: NodeOutcome::Failed,
            suggested_followups: Vec::new(),
            search_history,
        }
    }

    pub fn skipped() -> Self {
        Self {
            answer: SKIPPED_NODE_ANSWER.to_string(),
            confidence: Confidence::Low,
            outcome: NodeOutcome::Skipped,
            suggested_followups: Vec::new(),
            search_history: Vec::new(),
        }
    }
}

/// Summary of one ledger merge. Key lists are in update order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Updates that could not apply (e.g. `update` for an unknown key without content).
    pub ignored: Vec<String>,
}

impl MergeSummary {
    /// Number of updates that changed the ledger.
    pub fn applied(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_tagged_updates() {
        let raw = r#"{
            "reasoning": "split",
            "decision": "spawn",
            "nodes_to_spawn": [{"question": "q", "reason": "r", "parent_id": "n1"}],
            "findings_updates": [
                {"action": "add", "key": "k", "title": "t", "content": "c"},
                {"action": "update", "key": "k", "confidence": "high"},
                {"action": "remove", "key": "old"}
            ]
        }"#;
        let decision: Decision = serde_json::from_str(raw).expect("parse");
        assert_eq!(decision.verdict, Verdict::Spawn);
        assert_eq!(decision.nodes_to_spawn[0].parent_id.as_deref(), Some("n1"));
        assert_eq!(decision.findings_updates.len(), 3);
        assert_eq!(decision.findings_updates[2].key(), "old");
        assert!(matches!(
            decision.findings_updates[1],
            FindingUpdate::Update {
                confidence: Some(Confidence::High),
                ..
            }
        ));
    }

    #[test]
    fn merge_summary_counts_only_changes() {
        let summary = MergeSummary {
            added: vec!["a".to_string()],
            updated: vec!["b".to_string()],
            removed: Vec::new(),
            unchanged: vec!["c".to_string()],
            ignored: vec!["d".to_string()],
        };
        assert_eq!(summary.applied(), 2);
    }
}
