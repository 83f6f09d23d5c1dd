//! Typed progress events emitted by the scheduler.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::{Confidence, DecisionKind, NodeId, NodeOutcome, StopReason};

/// One observable step of a research run, in scheduler order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    NodeStarted {
        node_id: NodeId,
        parent_id: Option<NodeId>,
        question: String,
        depth: u32,
    },
    SearchCompleted {
        node_id: NodeId,
        query: String,
        source_count: usize,
    },
    NodeDone {
        node_id: NodeId,
        outcome: NodeOutcome,
        confidence: Confidence,
    },
    DecisionMade {
        seq: u32,
        trigger: Option<NodeId>,
        decision: DecisionKind,
        spawned: Vec<NodeId>,
        rejected: usize,
        findings_applied: usize,
    },
    ResearchComplete {
        stop_reason: StopReason,
        final_answer: String,
    },
    ResearchStopped {
        final_answer: String,
    },
}

impl ResearchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ResearchEvent::NodeStarted { .. } => "node_started",
            ResearchEvent::SearchCompleted { .. } => "search_completed",
            ResearchEvent::NodeDone { .. } => "node_done",
            ResearchEvent::DecisionMade { .. } => "decision_made",
            ResearchEvent::ResearchComplete { .. } => "research_complete",
            ResearchEvent::ResearchStopped { .. } => "research_stopped",
        }
    }

    /// True for the last event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResearchEvent::ResearchComplete { .. } | ResearchEvent::ResearchStopped { .. }
        )
    }
}

/// Sending half of the event stream. A disabled sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ResearchEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Deliver `event`. A closed receiver is not an error for the run.
    pub fn emit(&self, event: ResearchEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
