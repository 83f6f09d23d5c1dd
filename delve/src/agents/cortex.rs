//! Decision authority seam: growth decisions and final synthesis.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::agents::payload::PayloadError;
use crate::core::types::Decision;
use crate::state::{Confidence, Finding, NodeId, NodeOutcome, ResearchState};

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Evidence handed to `finish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum FinishInput {
    Findings(Vec<Finding>),
    /// Used when the ledger is empty.
    NodeAnswers(Vec<NodeAnswer>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAnswer {
    pub node_id: NodeId,
    pub question: String,
    pub answer: String,
    pub confidence: Confidence,
}

impl FinishInput {
    /// Findings when the ledger has any, else the answers of answered nodes.
    pub fn from_state(state: &ResearchState) -> Self {
        if !state.findings.is_empty() {
            return FinishInput::Findings(state.findings.clone());
        }
        let answers = state
            .nodes
            .iter()
            .filter(|node| node.outcome == Some(NodeOutcome::Answered))
            .filter_map(|node| {
                Some(NodeAnswer {
                    node_id: node.id.clone(),
                    question: node.question.clone(),
                    answer: node.answer.clone()?,
                    confidence: node.confidence?,
                })
            })
            .collect();
        FinishInput::NodeAnswers(answers)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FinishInput::Findings(items) => items.is_empty(),
            FinishInput::NodeAnswers(items) => items.is_empty(),
        }
    }
}

/// Central authority over tree growth.
///
/// The scheduler never has more than one call in flight, so implementations
/// may assume exclusive access to whatever they keep between calls.
#[async_trait]
pub trait DecisionAuthority: Send + Sync {
    /// Decide what to do next. `completed` is the node whose completion
    /// triggered this call, or `None` for the initial call.
    async fn evaluate(
        &self,
        state: &ResearchState,
        completed: Option<&str>,
    ) -> Result<Decision, DecisionError>;

    /// Synthesize the final answer.
    async fn finish(&self, state: &ResearchState, input: &FinishInput) -> Result<String, DecisionError>;
}

/// Deterministic report used by the rule-based authority and when `finish` fails.
pub fn render_report(objective: &str, input: &FinishInput) -> String {
    let mut out = format!("# {}\n", objective.trim());
    if input.is_empty() {
        out.push_str("\nNo evidence was gathered for this objective.\n");
        return out;
    }
    match input {
        FinishInput::Findings(findings) => {
            for finding in findings {
                out.push_str(&format!(
                    "\n## {} ({} confidence)\n\n{}\n",
                    finding.title, finding.confidence, finding.content
                ));
                let cited: Vec<String> = finding
                    .sources
                    .iter()
                    .map(|source| match &source.url {
                        Some(url) => format!("- {} <{}>", source.title, url),
                        None => format!("- {}", source.title),
                    })
                    .collect();
                if !cited.is_empty() {
                    out.push_str(&format!("\nSources:\n{}\n", cited.join("\n")));
                }
            }
        }
        FinishInput::NodeAnswers(answers) => {
            for answer in answers {
                out.push_str(&format!(
                    "\n## {} ({} confidence)\n\n{}\n",
                    answer.question, answer.confidence, answer.answer
                ));
            }
        }
    }
    out
}
