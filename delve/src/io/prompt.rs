//! Prompt pack builder for command-backed collaborators.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::agents::cortex::FinishInput;
use crate::agents::researcher::WorkerContext;
use crate::core::summary::{summarize_findings, summarize_tree};
use crate::state::{Followup, ResearchState, SearchEntry};

const CORTEX_EVALUATE_TEMPLATE: &str = include_str!("prompts/cortex_evaluate.md");
const CORTEX_FINISH_TEMPLATE: &str = include_str!("prompts/cortex_finish.md");
const ANALYST_REFLECT_TEMPLATE: &str = include_str!("prompts/analyst_reflect.md");
const ANALYST_CONCLUDE_TEMPLATE: &str = include_str!("prompts/analyst_conclude.md");

/// Tree outline lines included in cortex prompts.
const TREE_SUMMARY_LINES: usize = 200;

/// Drop order when over budget: least critical first.
const DROP_ORDER: [&str; 3] = ["tree", "lineage", "findings"];

/// Guardrail figures shown to the decision authority.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PromptLimits {
    pub max_spawn_per_decision: usize,
    pub remaining_nodes: usize,
    pub max_depth: u32,
}

#[derive(Debug, Clone, Serialize)]
struct CompletedNodeContext {
    id: String,
    question: String,
    answer: String,
    confidence: String,
    suggested_followups: Vec<Followup>,
}

impl CompletedNodeContext {
    fn from_state(state: &ResearchState, id: &str) -> Option<Self> {
        let node = state.node(id)?;
        Some(Self {
            id: node.id.clone(),
            question: node.question.clone(),
            answer: node.answer.clone().unwrap_or_default(),
            confidence: node
                .confidence
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
            suggested_followups: node.suggested_followups.clone(),
        })
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("cortex_evaluate", CORTEX_EVALUATE_TEMPLATE),
            ("cortex_finish", CORTEX_FINISH_TEMPLATE),
            ("analyst_reflect", ANALYST_REFLECT_TEMPLATE),
            ("analyst_conclude", ANALYST_CONCLUDE_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} template"))
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "tree").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, body_start, key, required)) in markers.iter().enumerate() {
        let body_end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*body_start..body_end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: truncate the largest section.
    let over = total_len(sections).saturating_sub(budget);
    if over == 0 {
        return;
    }
    if let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) {
        let before_len = largest.content.len();
        let keep = floor_char_boundary(&largest.content, before_len.saturating_sub(over + 12));
        largest.content.truncate(keep);
        largest.content.push_str("\n[truncated]");
        debug!(
            section = %largest.key,
            before_len,
            after_len = largest.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    fn finalize(&self, rendered: &str) -> PromptPack {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        PromptPack {
            content: render_sections(&sections),
        }
    }

    /// Prompt for `evaluate`; `completed` is the node that just finished.
    pub fn build_evaluate(
        &self,
        state: &ResearchState,
        completed: Option<&str>,
        limits: PromptLimits,
    ) -> Result<PromptPack> {
        let completed = completed.and_then(|id| CompletedNodeContext::from_state(state, id));
        let rendered = PromptEngine::new()?.render(
            "cortex_evaluate",
            context! {
                objective => state.objective.trim(),
                success_criteria => state.success_criteria.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                limits => limits,
                completed => completed,
                findings => summarize_findings(state),
                tree => summarize_tree(state, TREE_SUMMARY_LINES),
            },
        )?;
        Ok(self.finalize(&rendered))
    }

    pub fn build_finish(&self, state: &ResearchState, input: &FinishInput) -> Result<PromptPack> {
        let evidence = serde_json::to_string_pretty(input).context("serialize finish evidence")?;
        let rendered = PromptEngine::new()?.render(
            "cortex_finish",
            context! {
                objective => state.objective.trim(),
                success_criteria => state.success_criteria.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                evidence => evidence,
                tree => summarize_tree(state, TREE_SUMMARY_LINES),
            },
        )?;
        Ok(self.finalize(&rendered))
    }

    pub fn build_reflect(&self, ctx: &WorkerContext, history: &[SearchEntry]) -> Result<PromptPack> {
        let rendered = PromptEngine::new()?.render(
            "analyst_reflect",
            context! {
                objective => ctx.objective.trim(),
                lineage => &ctx.lineage,
                task => &ctx.task,
                history => history,
            },
        )?;
        Ok(self.finalize(&rendered))
    }

    pub fn build_conclude(
        &self,
        ctx: &WorkerContext,
        history: &[SearchEntry],
        max_followups: usize,
    ) -> Result<PromptPack> {
        let rendered = PromptEngine::new()?.render(
            "analyst_conclude",
            context! {
                objective => ctx.objective.trim(),
                lineage => &ctx.lineage,
                task => &ctx.task,
                history => history,
                max_followups => max_followups,
            },
        )?;
        Ok(self.finalize(&rendered))
    }
}

/// A rendered prompt ready to send to an agent command.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context_for, done_node, entry, finding, state_with};

    fn limits() -> PromptLimits {
        PromptLimits {
            max_spawn_per_decision: 3,
            remaining_nodes: 7,
            max_depth: 2,
        }
    }

    /// Sections appear in template order: contract, objective, node, findings, tree.
    #[test]
    fn evaluate_prompt_ordering_is_stable() {
        let mut state = state_with(vec![done_node("n1", None, 0)]);
        state.findings.push(finding("k", "ledger content"));
        let content = PromptBuilder::new(50_000)
            .build_evaluate(&state, Some("n1"), limits())
            .expect("build");
        let content = content.render();

        let contract = content.find("### Decision Contract").expect("contract");
        let objective = content.find("### Objective").expect("objective");
        let completed = content.find("### Completed Node").expect("completed");
        let findings = content.find("### Findings Ledger").expect("findings");
        let tree = content.find("### Research Tree").expect("tree");
        assert!(contract < objective && objective < completed);
        assert!(completed < findings && findings < tree);
        assert!(content.contains("7 more nodes fit"));
        assert!(content.contains("id: n1"));
        assert!(!content.contains("<!--"), "markers are stripped");
    }

    #[test]
    fn initial_evaluate_prompt_asks_for_roots() {
        let state = state_with(Vec::new());
        let pack = PromptBuilder::new(50_000)
            .build_evaluate(&state, None, limits())
            .expect("build");
        assert!(pack.render().contains("### Start"));
        assert!(!pack.render().contains("### Completed Node"));
    }

    /// With a tight budget the tree goes first, required sections stay.
    #[test]
    fn budget_drops_less_critical_sections_first() {
        let mut state = state_with(
            (1..=60)
                .map(|i| done_node(&format!("n{i}"), None, 0))
                .collect(),
        );
        state.findings.push(finding("k", &"evidence ".repeat(20)));
        let pack = PromptBuilder::new(2_600)
            .build_evaluate(&state, Some("n1"), limits())
            .expect("build");
        let content = pack.render();

        assert!(!content.contains("### Research Tree"), "tree should be dropped");
        assert!(content.contains("### Decision Contract"));
        assert!(content.contains("### Objective"));
        assert!(content.contains("### Completed Node"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut sections = vec![ParsedSection {
            key: "contract".to_string(),
            required: true,
            content: "é".repeat(100),
        }];
        apply_budget_to_sections(&mut sections, 50);
        assert!(sections[0].content.ends_with("[truncated]"));
        assert!(sections[0].content.len() <= 60);
    }

    #[test]
    fn analyst_prompts_render_history_and_lineage() {
        let ctx = context_for("n2", "How fast is it?");
        let history = vec![entry("How fast is it?", "Very fast.")];
        let reflect = PromptBuilder::new(50_000)
            .build_reflect(&ctx, &history)
            .expect("reflect");
        assert!(reflect.render().contains("#1 How fast is it?"));
        assert!(reflect.render().contains("Very fast."));

        let conclude = PromptBuilder::new(50_000)
            .build_conclude(&ctx, &history, 2)
            .expect("conclude");
        assert!(conclude.render().contains("at most\n2 follow-up"));
    }

    #[test]
    fn finish_prompt_embeds_evidence() {
        let mut state = state_with(vec![done_node("n1", None, 0)]);
        state.findings.push(finding("k", "ledger content"));
        let input = FinishInput::from_state(&state);
        let pack = PromptBuilder::new(50_000)
            .build_finish(&state, &input)
            .expect("finish");
        assert!(pack.render().contains("ledger content"));
        assert!(pack.render().contains("\"kind\": \"findings\""));
    }
}
