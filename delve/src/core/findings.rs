//! Findings ledger merge.
//!
//! Updates are keyed: `add`/`update` insert-or-overwrite, `remove` deletes.
//! Existing keys keep their position, new keys are appended. The merge is
//! total (no update can fail it) and idempotent: an update that would not
//! change an entry leaves it untouched, including `updated_at`.

use chrono::{DateTime, Utc};

use crate::core::types::{FindingUpdate, MergeSummary};
use crate::state::{Confidence, Finding, FindingSource};

/// Apply `updates` in order to `findings`.
///
/// Sources without a node tag are tagged with `origin` (the node whose
/// completion triggered the decision).
pub fn apply_findings_updates(
    findings: &mut Vec<Finding>,
    updates: &[FindingUpdate],
    origin: Option<&str>,
    now: DateTime<Utc>,
) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for update in updates {
        let key = update.key().trim();
        if key.is_empty() {
            summary.ignored.push(String::new());
            continue;
        }
        let position = findings.iter().position(|f| f.key == key);

        match update {
            FindingUpdate::Remove { .. } => match position {
                Some(idx) => {
                    findings.remove(idx);
                    summary.removed.push(key.to_string());
                }
                None => summary.unchanged.push(key.to_string()),
            },
            FindingUpdate::Add {
                title,
                content,
                confidence,
                sources,
                ..
            } => {
                let candidate = Finding {
                    key: key.to_string(),
                    title: title.clone(),
                    content: content.clone(),
                    confidence: confidence.unwrap_or(Confidence::Medium),
                    sources: tag_sources(sources, origin),
                    updated_at: now,
                };
                upsert(findings, position, candidate, &mut summary);
            }
            FindingUpdate::Update {
                title,
                content,
                confidence,
                sources,
                ..
            } => {
                let candidate = match position {
                    Some(idx) => {
                        let existing = &findings[idx];
                        Finding {
                            key: key.to_string(),
                            title: title.clone().unwrap_or_else(|| existing.title.clone()),
                            content: content.clone().unwrap_or_else(|| existing.content.clone()),
                            confidence: confidence.unwrap_or(existing.confidence),
                            sources: match sources {
                                Some(sources) => tag_sources(sources, origin),
                                None => existing.sources.clone(),
                            },
                            updated_at: now,
                        }
                    }
                    None => {
                        // An update for an unknown key only lands if it carries enough to stand alone.
                        let (Some(title), Some(content)) = (title, content) else {
                            summary.ignored.push(key.to_string());
                            continue;
                        };
                        Finding {
                            key: key.to_string(),
                            title: title.clone(),
                            content: content.clone(),
                            confidence: confidence.unwrap_or(Confidence::Medium),
                            sources: tag_sources(sources.as_deref().unwrap_or_default(), origin),
                            updated_at: now,
                        }
                    }
                };
                upsert(findings, position, candidate, &mut summary);
            }
        }
    }

    summary
}

fn upsert(
    findings: &mut Vec<Finding>,
    position: Option<usize>,
    candidate: Finding,
    summary: &mut MergeSummary,
) {
    match position {
        Some(idx) => {
            if same_content(&findings[idx], &candidate) {
                summary.unchanged.push(candidate.key);
                return;
            }
            summary.updated.push(candidate.key.clone());
            findings[idx] = candidate;
        }
        None => {
            summary.added.push(candidate.key.clone());
            findings.push(candidate);
        }
    }
}

fn same_content(a: &Finding, b: &Finding) -> bool {
    a.title == b.title && a.content == b.content && a.confidence == b.confidence && a.sources == b.sources
}

fn tag_sources(sources: &[FindingSource], origin: Option<&str>) -> Vec<FindingSource> {
    sources
        .iter()
        .map(|source| FindingSource {
            title: source.title.clone(),
            url: source.url.clone(),
            node_id: source
                .node_id
                .clone()
                .or_else(|| origin.map(str::to_string)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at;

    fn add(key: &str, content: &str) -> FindingUpdate {
        FindingUpdate::Add {
            key: key.to_string(),
            title: format!("{key} title"),
            content: content.to_string(),
            confidence: Some(Confidence::High),
            sources: vec![FindingSource {
                title: "source".to_string(),
                url: Some("https://example.com".to_string()),
                node_id: None,
            }],
        }
    }

    fn remove(key: &str) -> FindingUpdate {
        FindingUpdate::Remove {
            key: key.to_string(),
        }
    }

    fn keys(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.key.as_str()).collect()
    }

    #[test]
    fn add_appends_and_tags_sources_with_origin() {
        let mut findings = Vec::new();
        let summary = apply_findings_updates(&mut findings, &[add("a", "alpha")], Some("n2"), at(0));

        assert_eq!(summary.added, vec!["a".to_string()]);
        assert_eq!(findings[0].sources[0].node_id.as_deref(), Some("n2"));
        assert_eq!(findings[0].confidence, Confidence::High);
    }

    #[test]
    fn existing_keys_keep_position_and_new_keys_append() {
        let mut findings = Vec::new();
        apply_findings_updates(&mut findings, &[add("a", "1"), add("b", "2")], None, at(0));
        apply_findings_updates(&mut findings, &[add("c", "3"), add("a", "changed")], None, at(1));

        assert_eq!(keys(&findings), vec!["a", "b", "c"]);
        assert_eq!(findings[0].content, "changed");
        assert_eq!(findings[0].updated_at, at(1));
    }

    #[test]
    fn repeated_identical_updates_are_idempotent() {
        let mut findings = Vec::new();
        let update = FindingUpdate::Update {
            key: "k".to_string(),
            title: Some("title".to_string()),
            content: Some("content".to_string()),
            confidence: Some(Confidence::Low),
            sources: None,
        };
        apply_findings_updates(&mut findings, std::slice::from_ref(&update), Some("n1"), at(0));
        let snapshot = findings.clone();

        let summary = apply_findings_updates(&mut findings, &[update.clone(), update], Some("n1"), at(5));

        assert_eq!(findings, snapshot);
        assert_eq!(summary.applied(), 0);
        assert_eq!(summary.unchanged, vec!["k".to_string(), "k".to_string()]);
    }

    #[test]
    fn remove_then_add_matches_fresh_add() {
        let mut fresh = vec![];
        apply_findings_updates(&mut fresh, &[add("x", "1")], Some("n1"), at(1));
        apply_findings_updates(&mut fresh, &[add("k", "v")], Some("n1"), at(3));

        let mut cycled = vec![];
        apply_findings_updates(&mut cycled, &[add("k", "old"), add("x", "1")], Some("n1"), at(1));
        apply_findings_updates(&mut cycled, &[remove("k"), add("k", "v")], Some("n1"), at(3));

        assert_eq!(cycled, fresh);
    }

    #[test]
    fn partial_update_overwrites_only_given_fields() {
        let mut findings = Vec::new();
        apply_findings_updates(&mut findings, &[add("a", "alpha")], Some("n1"), at(0));
        let update = FindingUpdate::Update {
            key: "a".to_string(),
            title: None,
            content: None,
            confidence: Some(Confidence::Low),
            sources: None,
        };
        let summary = apply_findings_updates(&mut findings, &[update], Some("n2"), at(1));

        assert_eq!(summary.updated, vec!["a".to_string()]);
        assert_eq!(findings[0].content, "alpha");
        assert_eq!(findings[0].confidence, Confidence::Low);
        assert_eq!(findings[0].sources[0].node_id.as_deref(), Some("n1"));
    }

    #[test]
    fn unknown_keys_and_blank_keys_never_fail() {
        let mut findings = Vec::new();
        let updates = vec![
            remove("missing"),
            FindingUpdate::Update {
                key: "ghost".to_string(),
                title: None,
                content: Some("no title".to_string()),
                confidence: None,
                sources: None,
            },
            add("  ", "blank"),
        ];
        let summary = apply_findings_updates(&mut findings, &updates, None, at(0));

        assert!(findings.is_empty());
        assert_eq!(summary.unchanged, vec!["missing".to_string()]);
        assert_eq!(summary.ignored.len(), 2);
    }

    #[test]
    fn explicit_source_tags_are_preserved() {
        let mut findings = Vec::new();
        let update = FindingUpdate::Add {
            key: "k".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            confidence: None,
            sources: vec![FindingSource {
                title: "s".to_string(),
                url: None,
                node_id: Some("n7".to_string()),
            }],
        };
        apply_findings_updates(&mut findings, &[update], Some("n9"), at(0));
        assert_eq!(findings[0].sources[0].node_id.as_deref(), Some("n7"));
        assert_eq!(findings[0].confidence, Confidence::Medium);
    }
}
