//! Plain-text renderings of a research state for prompts and the CLI.

use crate::core::lineage::children;
use crate::state::{NodeStatus, ResearchNode, ResearchState};

/// Indented outline of the node tree, at most `max_lines` lines.
pub fn summarize_tree(state: &ResearchState, max_lines: usize) -> String {
    let mut lines = Vec::new();
    for root in state.nodes.iter().filter(|node| node.parent_id.is_none()) {
        summarize_tree_inner(state, root, 0, max_lines, &mut lines);
    }
    let total = state.nodes.len();
    if lines.len() < total && lines.len() >= max_lines {
        lines.push(format!("... ({} more nodes)", total - lines.len()));
    }
    lines.join("\n")
}

fn summarize_tree_inner(
    state: &ResearchState,
    node: &ResearchNode,
    depth: usize,
    max_lines: usize,
    lines: &mut Vec<String>,
) {
    if lines.len() >= max_lines {
        return;
    }
    let indent = "  ".repeat(depth);
    lines.push(format!("{}- {} [{}] {}", indent, node.id, status_label(node), node.question));
    for child in children(state, &node.id) {
        summarize_tree_inner(state, child, depth + 1, max_lines, lines);
    }
}

fn status_label(node: &ResearchNode) -> String {
    match (node.status, node.confidence) {
        (NodeStatus::Done, Some(confidence)) => format!("done, {confidence}"),
        (status, _) => status.to_string(),
    }
}

/// One block per finding: title, confidence, content, and source count.
pub fn summarize_findings(state: &ResearchState) -> String {
    if state.findings.is_empty() {
        return "(no findings yet)".to_string();
    }
    state
        .findings
        .iter()
        .map(|finding| {
            format!(
                "[{}] {} ({}, {} sources)\n{}",
                finding.key,
                finding.title,
                finding.confidence,
                finding.sources.len(),
                finding.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Counts line used in logs and the CLI footer.
pub fn status_counts(state: &ResearchState) -> String {
    format!(
        "nodes={} pending={} running={} done={} findings={} decisions={}",
        state.nodes.len(),
        state.count_with_status(NodeStatus::Pending),
        state.count_with_status(NodeStatus::Running),
        state.count_with_status(NodeStatus::Done),
        state.findings.len(),
        state.decision_log.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{done_node, finding, pending_node, state_with};

    #[test]
    fn tree_outline_nests_children_under_parents() {
        let state = state_with(vec![
            done_node("n1", None, 0),
            pending_node("n2", None, 0),
            pending_node("n3", Some("n1"), 1),
        ]);
        let outline = summarize_tree(&state, 10);
        let lines: Vec<_> = outline.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("- n1 [done, medium]"));
        assert!(lines[1].starts_with("  - n3 [pending]"));
        assert!(lines[2].starts_with("- n2 [pending]"));
    }

    #[test]
    fn tree_outline_is_truncated() {
        let state = state_with(vec![
            done_node("n1", None, 0),
            done_node("n2", None, 0),
            done_node("n3", None, 0),
        ]);
        let outline = summarize_tree(&state, 2);
        assert!(outline.ends_with("... (1 more nodes)"));
    }

    #[test]
    fn findings_summary_lists_each_entry() {
        let mut state = state_with(Vec::new());
        assert_eq!(summarize_findings(&state), "(no findings yet)");
        state.findings = vec![finding("a", "alpha"), finding("b", "beta")];
        let text = summarize_findings(&state);
        assert!(text.contains("[a]"));
        assert!(text.contains("beta"));
    }
}
