//! Research state: the node arena, findings ledger, and decision log.
//!
//! Nodes live in a flat arena in creation order. `parent_id` is a lookup-only
//! back-reference; parents never hold their children.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};

pub type NodeId = String;

/// Lifecycle of a node. Transitions only move forward.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Done,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Done => "done",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which terminal path moved a node to `done`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The worker finished its loop and concluded.
    Answered,
    /// The worker errored or panicked; the scheduler substituted a fallback.
    Failed,
    /// The worker observed cancellation (or was abandoned) mid-flight.
    Stopped,
    /// The run ended before the node was ever launched.
    Skipped,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Followup {
    pub question: String,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchEntry {
    pub query: String,
    pub result_text: String,
    pub sources: Vec<Source>,
    pub timestamp: DateTime<Utc>,
    pub reflection: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub question: String,
    pub reason: String,
    /// Parent hops to the root (roots are depth 0).
    pub depth: u32,
    pub status: NodeStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub answer: Option<String>,
    pub confidence: Option<Confidence>,
    pub outcome: Option<NodeOutcome>,
    pub suggested_followups: Vec<Followup>,
    pub search_history: Vec<SearchEntry>,
}

impl ResearchNode {
    pub fn is_done(&self) -> bool {
        self.status == NodeStatus::Done
    }
}

/// A source attached to a finding, tagged with the node that produced it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindingSource {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub node_id: Option<NodeId>,
}

/// Curated, deduplicated knowledge unit. `key` is the merge identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub key: String,
    pub title: String,
    pub content: String,
    pub confidence: Confidence,
    pub sources: Vec<FindingSource>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Running,
    Complete,
    Stopped,
}

impl ResearchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResearchStatus::Running => "running",
            ResearchStatus::Complete => "complete",
            ResearchStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the scheduler stopped spawning.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The decision authority declared the objective answered.
    DecidedDone,
    /// Nothing pending or running and no further spawns were requested.
    Exhausted,
    /// The node budget is spent and every node has settled.
    NodeLimit,
    /// The wall-clock budget ran out.
    TimeLimit,
    /// Cancellation was requested.
    Cancelled,
    /// The decision authority failed; treated as done.
    DecisionFailed,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::DecidedDone => "decided_done",
            StopReason::Exhausted => "exhausted",
            StopReason::NodeLimit => "node_limit",
            StopReason::TimeLimit => "time_limit",
            StopReason::Cancelled => "cancelled",
            StopReason::DecisionFailed => "decision_failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionTrigger {
    Initial,
    Node { node_id: NodeId },
    Finish,
}

impl DecisionTrigger {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            DecisionTrigger::Node { node_id } => Some(node_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Spawn,
    Done,
    Finish,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedSpawn {
    pub question: String,
    pub parent_id: Option<NodeId>,
    pub reason: String,
}

/// One decision authority call and its effect on the state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionRecord {
    pub seq: u32,
    pub at: DateTime<Utc>,
    pub trigger: DecisionTrigger,
    pub reasoning: String,
    pub decision: DecisionKind,
    pub spawned: Vec<NodeId>,
    pub rejected: Vec<RejectedSpawn>,
    pub findings_applied: usize,
    pub error: Option<String>,
}

/// Aggregate root for one research run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchState {
    pub run_id: String,
    pub objective: String,
    pub success_criteria: Option<String>,
    pub status: ResearchStatus,
    pub stop_reason: Option<StopReason>,
    pub final_answer: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub nodes: Vec<ResearchNode>,
    pub findings: Vec<Finding>,
    pub decision_log: Vec<DecisionRecord>,
}

impl ResearchState {
    pub fn new(
        run_id: impl Into<String>,
        objective: impl Into<String>,
        success_criteria: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            objective: objective.into(),
            success_criteria,
            status: ResearchStatus::Running,
            stop_reason: None,
            final_answer: None,
            started_at: now,
            finished_at: None,
            nodes: Vec::new(),
            findings: Vec::new(),
            decision_log: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&ResearchNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut ResearchNode> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn count_with_status(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|node| node.status == status).count()
    }

    /// Pending node ids in creation order.
    pub fn pending_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Pending)
            .map(|node| node.id.clone())
            .collect()
    }

    /// True when no node is pending or running.
    pub fn is_settled(&self) -> bool {
        self.nodes.iter().all(ResearchNode::is_done)
    }

    /// Next arena id. Ids are never reused because nodes are never deleted.
    pub fn next_node_id(&self) -> NodeId {
        format!("n{}", self.nodes.len() + 1)
    }

    pub fn next_decision_seq(&self) -> u32 {
        self.decision_log.len() as u32 + 1
    }
}

/// Generate a run id of the form `run-<timestamp>-<suffix>`.
pub fn generate_run_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{}-{}", now.format("%Y%m%d_%H%M%S"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, done_node, pending_node, state_with};

    #[test]
    fn next_node_id_follows_arena_length() {
        let state = state_with(vec![pending_node("n1", None, 0), pending_node("n2", None, 0)]);
        assert_eq!(state.next_node_id(), "n3");
    }

    #[test]
    fn pending_ids_preserve_creation_order() {
        let state = state_with(vec![
            pending_node("n1", None, 0),
            done_node("n2", None, 0),
            pending_node("n3", Some("n2"), 1),
        ]);
        assert_eq!(state.pending_ids(), vec!["n1".to_string(), "n3".to_string()]);
        assert!(!state.is_settled());
    }

    #[test]
    fn state_serializes_with_snake_case_tags() {
        let mut state = state_with(vec![done_node("n1", None, 0)]);
        state.stop_reason = Some(StopReason::TimeLimit);
        state.decision_log.push(DecisionRecord {
            seq: 1,
            at: at(0),
            trigger: DecisionTrigger::Node {
                node_id: "n1".to_string(),
            },
            reasoning: "enough".to_string(),
            decision: DecisionKind::Done,
            spawned: Vec::new(),
            rejected: Vec::new(),
            findings_applied: 0,
            error: None,
        });

        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["stop_reason"], "time_limit");
        assert_eq!(json["decision_log"][0]["trigger"]["kind"], "node");
        assert_eq!(json["nodes"][0]["status"], "done");

        let back: ResearchState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }

    #[test]
    fn run_ids_have_stable_shape() {
        let id = generate_run_id(at(0));
        assert!(id.starts_with("run-"));
        let suffix = id.rsplit('-').next().expect("suffix");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
