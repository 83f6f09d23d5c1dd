//! Guardrail checks for nodes the decision authority asks to create.
//!
//! The decision authority proposes; this module disposes. Every request is
//! either accepted (with its computed depth) or rejected with a stable reason.
//! Limits apply independently of what the authority asks for.

use crate::core::types::{Limits, SpawnRequest};
use crate::state::{NodeId, RejectedSpawn, ResearchState};

pub const REASON_SPAWNING_STOPPED: &str = "spawning stopped";
pub const REASON_DECISION_DONE: &str = "decision is done";
pub const REASON_EMPTY_FIELDS: &str = "question and reason are required";
pub const REASON_FANOUT_LIMIT: &str = "fan-out limit reached";
pub const REASON_NODE_LIMIT: &str = "node limit reached";
pub const REASON_UNKNOWN_PARENT: &str = "unknown parent";
pub const REASON_DEPTH_LIMIT: &str = "depth limit reached";

/// A request that passed every guardrail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedSpawn {
    pub question: String,
    pub reason: String,
    pub parent_id: Option<NodeId>,
    pub depth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnPlan {
    pub accepted: Vec<AcceptedSpawn>,
    pub rejected: Vec<RejectedSpawn>,
}

/// Whether the scheduler is accepting new nodes for this decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnGate {
    Open,
    /// Closed with a reason recorded on every request.
    Closed(&'static str),
}

/// Partition `requests` into accepted and rejected spawns.
///
/// Requests are considered in order, so under a tight budget the authority's
/// earlier proposals win.
pub fn plan_spawns(
    state: &ResearchState,
    requests: &[SpawnRequest],
    limits: &Limits,
    gate: SpawnGate,
) -> SpawnPlan {
    let mut plan = SpawnPlan::default();

    for request in requests {
        let verdict = check_request(state, request, limits, gate, plan.accepted.len());
        match verdict {
            Ok(depth) => plan.accepted.push(AcceptedSpawn {
                question: request.question.trim().to_string(),
                reason: request.reason.trim().to_string(),
                parent_id: request.parent_id.clone(),
                depth,
            }),
            Err(reason) => plan.rejected.push(RejectedSpawn {
                question: request.question.clone(),
                parent_id: request.parent_id.clone(),
                reason: reason.to_string(),
            }),
        }
    }

    plan
}

fn check_request(
    state: &ResearchState,
    request: &SpawnRequest,
    limits: &Limits,
    gate: SpawnGate,
    accepted_so_far: usize,
) -> Result<u32, &'static str> {
    if let SpawnGate::Closed(reason) = gate {
        return Err(reason);
    }
    if request.question.trim().is_empty() || request.reason.trim().is_empty() {
        return Err(REASON_EMPTY_FIELDS);
    }
    if accepted_so_far >= limits.max_spawn_per_decision {
        return Err(REASON_FANOUT_LIMIT);
    }
    if state.nodes.len() + accepted_so_far >= limits.max_nodes {
        return Err(REASON_NODE_LIMIT);
    }

    let depth = match request.parent_id.as_deref() {
        None => 0,
        Some(parent_id) => {
            let parent = state.node(parent_id).ok_or(REASON_UNKNOWN_PARENT)?;
            parent.depth + 1
        }
    };
    if depth > limits.max_depth {
        return Err(REASON_DEPTH_LIMIT);
    }
    Ok(depth)
}

/// True when no further node fits under `max_nodes`.
pub fn node_budget_spent(state: &ResearchState, limits: &Limits) -> bool {
    state.nodes.len() >= limits.max_nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{done_node, pending_node, state_with};

    fn request(question: &str, parent: Option<&str>) -> SpawnRequest {
        SpawnRequest {
            question: question.to_string(),
            reason: format!("because {question}"),
            parent_id: parent.map(str::to_string),
        }
    }

    fn reasons(plan: &SpawnPlan) -> Vec<&str> {
        plan.rejected.iter().map(|r| r.reason.as_str()).collect()
    }

    #[test]
    fn accepts_roots_and_children_with_depth() {
        let state = state_with(vec![done_node("n1", None, 0)]);
        let plan = plan_spawns(
            &state,
            &[request("root", None), request("child", Some("n1"))],
            &Limits::default(),
            SpawnGate::Open,
        );

        assert!(plan.rejected.is_empty());
        assert_eq!(plan.accepted[0].depth, 0);
        assert_eq!(plan.accepted[1].depth, 1);
        assert_eq!(plan.accepted[1].parent_id.as_deref(), Some("n1"));
    }

    #[test]
    fn rejects_unknown_parent_and_blank_fields() {
        let state = state_with(vec![done_node("n1", None, 0)]);
        let mut blank = request("q", None);
        blank.reason = "  ".to_string();
        let plan = plan_spawns(
            &state,
            &[request("orphan", Some("n99")), blank],
            &Limits::default(),
            SpawnGate::Open,
        );

        assert!(plan.accepted.is_empty());
        assert_eq!(reasons(&plan), vec![REASON_UNKNOWN_PARENT, REASON_EMPTY_FIELDS]);
    }

    #[test]
    fn caps_fan_out_per_decision() {
        let state = state_with(Vec::new());
        let limits = Limits {
            max_spawn_per_decision: 2,
            ..Limits::default()
        };
        let requests: Vec<_> = (0..4).map(|i| request(&format!("q{i}"), None)).collect();
        let plan = plan_spawns(&state, &requests, &limits, SpawnGate::Open);

        assert_eq!(plan.accepted.len(), 2);
        assert_eq!(reasons(&plan), vec![REASON_FANOUT_LIMIT, REASON_FANOUT_LIMIT]);
    }

    #[test]
    fn never_exceeds_max_nodes() {
        let state = state_with(vec![done_node("n1", None, 0), pending_node("n2", None, 0)]);
        let limits = Limits {
            max_nodes: 3,
            ..Limits::default()
        };
        let plan = plan_spawns(
            &state,
            &[request("a", Some("n1")), request("b", Some("n1"))],
            &limits,
            SpawnGate::Open,
        );

        assert_eq!(plan.accepted.len(), 1);
        assert_eq!(reasons(&plan), vec![REASON_NODE_LIMIT]);
    }

    #[test]
    fn rejects_children_past_max_depth() {
        let state = state_with(vec![done_node("n1", None, 0), done_node("n2", Some("n1"), 1)]);
        let limits = Limits {
            max_depth: 1,
            ..Limits::default()
        };
        let plan = plan_spawns(
            &state,
            &[request("too deep", Some("n2")), request("ok", Some("n1"))],
            &limits,
            SpawnGate::Open,
        );

        assert_eq!(plan.accepted.len(), 1);
        assert_eq!(plan.accepted[0].question, "ok");
        assert_eq!(reasons(&plan), vec![REASON_DEPTH_LIMIT]);
    }

    #[test]
    fn closed_gate_rejects_everything_with_its_reason() {
        let state = state_with(Vec::new());
        let plan = plan_spawns(
            &state,
            &[request("a", None)],
            &Limits::default(),
            SpawnGate::Closed(REASON_SPAWNING_STOPPED),
        );

        assert!(plan.accepted.is_empty());
        assert_eq!(reasons(&plan), vec![REASON_SPAWNING_STOPPED]);
    }
}
