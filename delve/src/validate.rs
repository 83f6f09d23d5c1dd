//! `delve validate` and `delve show`: checks and renders a persisted state file.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;

use crate::core::summary::{status_counts, summarize_findings, summarize_tree};
use crate::io::state_store::load_state;
use crate::state::ResearchState;

/// Tree lines printed by `delve show`.
const SHOW_TREE_LINES: usize = 500;

/// One-line summary of a valid state file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub run_id: String,
    pub nodes: usize,
    pub findings: usize,
    pub decisions: usize,
}

/// Load `path` with schema + invariant checks.
pub fn validate_state_file(path: &Path) -> Result<ValidateOutcome> {
    let state = load_state(path)?;
    Ok(ValidateOutcome {
        run_id: state.run_id,
        nodes: state.nodes.len(),
        findings: state.findings.len(),
        decisions: state.decision_log.len(),
    })
}

/// Human-readable view of a run: header, tree outline, findings, answer.
pub fn render_state(state: &ResearchState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run: {}", state.run_id);
    let _ = writeln!(out, "objective: {}", state.objective);
    if let Some(criteria) = &state.success_criteria {
        let _ = writeln!(out, "success criteria: {criteria}");
    }
    match state.stop_reason {
        Some(reason) => {
            let _ = writeln!(out, "status: {} ({reason})", state.status);
        }
        None => {
            let _ = writeln!(out, "status: {}", state.status);
        }
    }
    let _ = writeln!(out, "{}", status_counts(state));

    let _ = writeln!(out, "\n## Tree\n");
    if state.nodes.is_empty() {
        let _ = writeln!(out, "(no nodes)");
    } else {
        let _ = writeln!(out, "{}", summarize_tree(state, SHOW_TREE_LINES));
    }
    let _ = writeln!(out, "\n## Findings\n\n{}", summarize_findings(state));
    if let Some(answer) = &state.final_answer {
        let _ = writeln!(out, "\n## Final answer\n\n{}", answer.trim_end());
    }
    out
}

/// Load and render `path`.
pub fn show_state_file(path: &Path) -> Result<String> {
    Ok(render_state(&load_state(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::state_store::write_state;
    use crate::state::{ResearchStatus, StopReason};
    use crate::test_support::{at, done_node, finding, pending_node, state_with};

    #[test]
    fn validate_reports_counts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut state = state_with(vec![done_node("n1", None, 0), pending_node("n2", Some("n1"), 1)]);
        state.findings.push(finding("k", "c"));
        write_state(&path, &state).expect("write");

        let outcome = validate_state_file(&path).expect("valid");
        assert_eq!(outcome.run_id, "run-test");
        assert_eq!(outcome.nodes, 2);
        assert_eq!(outcome.findings, 1);
        assert!(validate_state_file(&temp.path().join("missing.json")).is_err());
    }

    #[test]
    fn render_includes_tree_findings_and_answer() {
        let mut state = state_with(vec![done_node("n1", None, 0), done_node("n2", Some("n1"), 1)]);
        state.findings.push(finding("k", "ledger text"));
        state.status = ResearchStatus::Complete;
        state.stop_reason = Some(StopReason::DecidedDone);
        state.final_answer = Some("the answer\n".to_string());
        state.finished_at = Some(at(5));

        let text = render_state(&state);
        assert!(text.contains("status: complete (decided_done)"));
        assert!(text.contains("- n1 [done, medium]"));
        assert!(text.contains("  - n2 [done, medium]"));
        assert!(text.contains("ledger text"));
        assert!(text.ends_with("the answer\n"));
    }
}
