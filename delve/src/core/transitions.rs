//! Scheduler-owned node lifecycle transitions.
//!
//! Status only moves forward: `pending -> running -> done`, plus
//! `pending -> done` for nodes skipped when a run stops before launching them.
//! Any other transition is a scheduler bug and is reported as an error.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::spawn::AcceptedSpawn;
use crate::core::types::NodeResolution;
use crate::state::{NodeId, NodeStatus, ResearchNode, ResearchState, SearchEntry};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("node '{0}' not found")]
    UnknownNode(NodeId),
    #[error("node '{id}' cannot move from {from} to {to}")]
    Illegal {
        id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },
}

/// Append a new pending node to the arena and return its id.
pub fn insert_node(state: &mut ResearchState, spawn: &AcceptedSpawn, now: DateTime<Utc>) -> NodeId {
    let id = state.next_node_id();
    state.nodes.push(ResearchNode {
        id: id.clone(),
        parent_id: spawn.parent_id.clone(),
        question: spawn.question.clone(),
        reason: spawn.reason.clone(),
        depth: spawn.depth,
        status: NodeStatus::Pending,
        created_at: now,
        started_at: None,
        completed_at: None,
        answer: None,
        confidence: None,
        outcome: None,
        suggested_followups: Vec::new(),
        search_history: Vec::new(),
    });
    id
}

/// `pending -> running`. A node is launched at most once.
pub fn mark_running(
    state: &mut ResearchState,
    id: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let node = find(state, id)?;
    if node.status != NodeStatus::Pending {
        return Err(illegal(node, NodeStatus::Running));
    }
    node.status = NodeStatus::Running;
    node.started_at = Some(now);
    Ok(())
}

/// `running -> done` with the worker's (or fallback) resolution.
pub fn mark_done(
    state: &mut ResearchState,
    id: &str,
    resolution: NodeResolution,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let node = find(state, id)?;
    if node.status != NodeStatus::Running {
        return Err(illegal(node, NodeStatus::Done));
    }
    settle(node, resolution, now);
    Ok(())
}

/// Mirror one worker search into the node while it runs.
///
/// Progress for a node that is no longer running is dropped.
pub fn record_search(
    state: &mut ResearchState,
    id: &str,
    entry: SearchEntry,
) -> Result<bool, TransitionError> {
    let node = find(state, id)?;
    if node.status != NodeStatus::Running {
        return Ok(false);
    }
    node.search_history.push(entry);
    Ok(true)
}

/// `pending -> done` for every node that was never launched. Returns their ids.
pub fn skip_pending(state: &mut ResearchState, now: DateTime<Utc>) -> Vec<NodeId> {
    let mut skipped = Vec::new();
    for node in &mut state.nodes {
        if node.status == NodeStatus::Pending {
            settle(node, NodeResolution::skipped(), now);
            skipped.push(node.id.clone());
        }
    }
    skipped
}

fn settle(node: &mut ResearchNode, resolution: NodeResolution, now: DateTime<Utc>) {
    node.status = NodeStatus::Done;
    node.completed_at = Some(now);
    node.answer = Some(resolution.answer);
    node.confidence = Some(resolution.confidence);
    node.outcome = Some(resolution.outcome);
    node.suggested_followups = resolution.suggested_followups;
    // Skipped and stopped fallbacks carry no history; keep whatever was mirrored.
    if !resolution.search_history.is_empty() {
        node.search_history = resolution.search_history;
    }
}

fn find<'a>(state: &'a mut ResearchState, id: &str) -> Result<&'a mut ResearchNode, TransitionError> {
    state
        .node_mut(id)
        .ok_or_else(|| TransitionError::UnknownNode(id.to_string()))
}

fn illegal(node: &ResearchNode, to: NodeStatus) -> TransitionError {
    TransitionError::Illegal {
        id: node.id.clone(),
        from: node.status,
        to,
    }
}
