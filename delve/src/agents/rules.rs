//! Deterministic, offline collaborators.
//!
//! [`RuleCortex`] and [`HeuristicAnalyst`] need no model. They back the
//! default configuration and make runs reproducible.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::agents::analyst::{Analyst, Conclusion, Reflection, ReflectionVerdict};
use crate::agents::cortex::{DecisionAuthority, DecisionError, FinishInput, render_report};
use crate::agents::researcher::WorkerContext;
use crate::core::types::{Decision, FindingUpdate, SpawnRequest};
use crate::state::{
    Confidence, FindingSource, Followup, NodeOutcome, NodeStatus, ResearchNode, ResearchState,
    SearchEntry,
};

/// Angles used to refine a question, in order.
const REFINEMENTS: [&str; 5] = [
    "overview",
    "evidence",
    "limitations",
    "recent developments",
    "comparisons",
];

/// Rule-based decision authority.
///
/// Seeds one root per seed question, folds every answered node into a
/// finding keyed `node-<id>`, approves the node's suggested follow-ups while
/// the tree is below `target_nodes`, and declares done once that many nodes
/// are done.
#[derive(Debug, Clone)]
pub struct RuleCortex {
    seeds: Vec<String>,
    target_nodes: usize,
    followups_per_node: usize,
}

impl RuleCortex {
    pub fn new(seeds: Vec<String>, target_nodes: usize, followups_per_node: usize) -> Self {
        Self {
            seeds,
            target_nodes,
            followups_per_node,
        }
    }

    fn initial(&self, state: &ResearchState) -> Decision {
        let seeds: Vec<String> = if self.seeds.is_empty() {
            vec![state.objective.clone()]
        } else {
            self.seeds.clone()
        };
        let requests = seeds
            .into_iter()
            .map(|question| SpawnRequest {
                question,
                reason: "seed question for the objective".to_string(),
                parent_id: None,
            })
            .collect::<Vec<_>>();
        Decision::spawn(format!("seeding {} root questions", requests.len()), requests)
    }

    fn after_node(&self, state: &ResearchState, node: &ResearchNode) -> Decision {
        let updates = finding_for(node).into_iter().collect::<Vec<_>>();
        let done = state.count_with_status(NodeStatus::Done);
        if done >= self.target_nodes {
            return Decision::done(format!("{done} nodes done, target is {}", self.target_nodes))
                .with_updates(updates);
        }

        let room = self.target_nodes.saturating_sub(state.nodes.len());
        let requests = node
            .suggested_followups
            .iter()
            .take(self.followups_per_node.min(room))
            .map(|followup| SpawnRequest {
                question: followup.question.clone(),
                reason: followup.reason.clone(),
                parent_id: Some(node.id.clone()),
            })
            .collect::<Vec<_>>();
        let reasoning = if requests.is_empty() {
            format!("{} resolved without new questions", node.id)
        } else {
            format!("{} raised {} follow-ups", node.id, requests.len())
        };
        Decision::spawn(reasoning, requests).with_updates(updates)
    }
}

/// Ledger entry for an answered node, with sources from its search history.
fn finding_for(node: &ResearchNode) -> Option<FindingUpdate> {
    if node.outcome != Some(NodeOutcome::Answered) {
        return None;
    }
    let mut seen = BTreeSet::new();
    let sources = node
        .search_history
        .iter()
        .flat_map(|entry| entry.sources.iter())
        .filter(|source| seen.insert((source.title.clone(), source.url.clone())))
        .map(|source| FindingSource {
            title: source.title.clone(),
            url: source.url.clone(),
            node_id: None,
        })
        .collect();
    Some(FindingUpdate::Add {
        key: format!("node-{}", node.id),
        title: node.question.clone(),
        content: node.answer.clone()?,
        confidence: node.confidence,
        sources,
    })
}

#[async_trait]
impl DecisionAuthority for RuleCortex {
    async fn evaluate(
        &self,
        state: &ResearchState,
        completed: Option<&str>,
    ) -> Result<Decision, DecisionError> {
        let decision = match completed.and_then(|id| state.node(id)) {
            None if completed.is_none() => self.initial(state),
            None => Decision::spawn("completed node not found", Vec::new()),
            Some(node) => self.after_node(state, node),
        };
        debug!(verdict = ?decision.verdict, spawns = decision.nodes_to_spawn.len(), "rule cortex decided");
        Ok(decision)
    }

    async fn finish(&self, state: &ResearchState, input: &FinishInput) -> Result<String, DecisionError> {
        Ok(render_report(&state.objective, input))
    }
}

/// Evidence-counting analyst.
///
/// Reflection: a search with no text and no sources is a dead end; anything
/// else is `done` (the worker keeps searching until its minimum) with the next
/// refinement angle as the follow-up query.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyst;

impl HeuristicAnalyst {
    fn refinement(question: &str, idx: usize) -> Option<String> {
        REFINEMENTS
            .get(idx)
            .map(|angle| format!("{question}: {angle}"))
    }
}

/// Distinct sources across the history, by url when present, else by title.
fn distinct_sources(history: &[SearchEntry]) -> usize {
    history
        .iter()
        .flat_map(|entry| entry.sources.iter())
        .map(|source| source.url.clone().unwrap_or_else(|| source.title.clone()))
        .collect::<BTreeSet<_>>()
        .len()
}

fn confidence_for(source_count: usize) -> Confidence {
    match source_count {
        0 => Confidence::Low,
        1 | 2 => Confidence::Medium,
        _ => Confidence::High,
    }
}

#[async_trait]
impl Analyst for HeuristicAnalyst {
    async fn reflect(&self, ctx: &WorkerContext, history: &[SearchEntry]) -> Result<Reflection> {
        let Some(latest) = history.last() else {
            return Ok(Reflection::carry_on(None, "no searches yet"));
        };
        if latest.result_text.trim().is_empty() && latest.sources.is_empty() {
            return Ok(Reflection {
                verdict: ReflectionVerdict::DeadEnd,
                next_query: None,
                note: format!("nothing found for '{}'", latest.query),
            });
        }
        Ok(Reflection {
            verdict: ReflectionVerdict::Done,
            // The first search is the bare question, so refinements start at index 1.
            next_query: Self::refinement(&ctx.task.question, history.len()),
            note: format!("{} sources so far", distinct_sources(history)),
        })
    }

    async fn conclude(
        &self,
        ctx: &WorkerContext,
        history: &[SearchEntry],
        max_followups: usize,
    ) -> Result<Conclusion> {
        let mut seen = BTreeSet::new();
        let texts: Vec<&str> = history
            .iter()
            .map(|entry| entry.result_text.trim())
            .filter(|text| !text.is_empty() && seen.insert(*text))
            .collect();
        if texts.is_empty() {
            return Ok(Conclusion {
                answer: format!("No evidence found for: {}", ctx.task.question),
                confidence: Confidence::Low,
                suggested_followups: Vec::new(),
            });
        }

        let searched: BTreeSet<&str> = history.iter().map(|entry| entry.query.as_str()).collect();
        let suggested_followups = (0..REFINEMENTS.len())
            .filter_map(|idx| Self::refinement(&ctx.task.question, idx))
            .filter(|query| !searched.contains(query.as_str()))
            .take(max_followups)
            .map(|question| Followup {
                question,
                reason: format!("refines '{}'", ctx.task.question),
            })
            .collect();

        Ok(Conclusion {
            answer: texts.join("\n\n"),
            confidence: confidence_for(distinct_sources(history)),
            suggested_followups,
        })
    }
}
