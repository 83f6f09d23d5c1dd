//! Semantic invariants not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::core::types::Limits;
use crate::state::{NodeOutcome, NodeStatus, ResearchNode, ResearchState, ResearchStatus};

/// Check semantic invariants not expressible in JSON Schema:
/// - No duplicate node ids or finding keys
/// - Every `parent_id` names a node created earlier (so the graph is a tree)
/// - Cached `depth` matches the parent chain
/// - `answer`/`confidence`/`completed_at` are set iff the node is done
/// - A finished run has no pending or running node
/// - With `limits`: node count and depth stay within bounds
pub fn validate_invariants(state: &ResearchState, limits: Option<&Limits>) -> Vec<String> {
    let mut errors = Vec::new();
    let mut depth_by_id: HashMap<&str, u32> = HashMap::new();

    for node in &state.nodes {
        if depth_by_id.contains_key(node.id.as_str()) {
            errors.push(format!("duplicate node id '{}'", node.id));
            continue;
        }

        let expected_depth = match node.parent_id.as_deref() {
            None => Some(0),
            Some(parent_id) => match depth_by_id.get(parent_id) {
                Some(parent_depth) => Some(parent_depth + 1),
                None => {
                    errors.push(format!(
                        "{}: parent '{}' does not precede it",
                        node.id, parent_id
                    ));
                    None
                }
            },
        };
        if let Some(expected) = expected_depth
            && expected != node.depth
        {
            errors.push(format!(
                "{}: depth {} does not match parent chain ({})",
                node.id, node.depth, expected
            ));
        }
        if let Some(limits) = limits
            && node.depth > limits.max_depth
        {
            errors.push(format!(
                "{}: depth {} exceeds max_depth {}",
                node.id, node.depth, limits.max_depth
            ));
        }

        let done = node.status == NodeStatus::Done;
        let terminal_fields = [
            ("answer", node.answer.is_some()),
            ("confidence", node.confidence.is_some()),
            ("completed_at", node.completed_at.is_some()),
            ("outcome", node.outcome.is_some()),
        ];
        for (field, present) in terminal_fields {
            if done && !present {
                errors.push(format!("{}: done node is missing {}", node.id, field));
            }
            if !done && present {
                errors.push(format!("{}: {} node has {} set", node.id, node.status, field));
            }
        }
        if node.status != NodeStatus::Pending && node.started_at.is_none() && !is_skipped(node) {
            errors.push(format!("{}: launched node is missing started_at", node.id));
        }

        depth_by_id.insert(node.id.as_str(), node.depth);
    }

    if let Some(limits) = limits
        && state.nodes.len() > limits.max_nodes
    {
        errors.push(format!(
            "node count {} exceeds max_nodes {}",
            state.nodes.len(),
            limits.max_nodes
        ));
    }

    let mut keys = HashSet::new();
    for finding in &state.findings {
        if !keys.insert(finding.key.as_str()) {
            errors.push(format!("duplicate finding key '{}'", finding.key));
        }
    }

    for (idx, record) in state.decision_log.iter().enumerate() {
        if record.seq as usize != idx + 1 {
            errors.push(format!(
                "decision_log[{}]: seq {} is out of order",
                idx, record.seq
            ));
        }
    }

    if state.status != ResearchStatus::Running {
        if !state.is_settled() {
            errors.push(format!(
                "{:?} run still has pending or running nodes",
                state.status
            ));
        }
        if state.final_answer.is_none() {
            errors.push("finished run is missing final_answer".to_string());
        }
        if state.stop_reason.is_none() {
            errors.push("finished run is missing stop_reason".to_string());
        }
    }

    errors
}

fn is_skipped(node: &ResearchNode) -> bool {
    node.outcome == Some(NodeOutcome::Skipped)
}
