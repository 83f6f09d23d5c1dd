//! Node worker: resolves one question through a bounded search loop.
//!
//! `Searching -> Reflecting -> (Searching | Finishing) -> done`. The worker
//! never touches the research state. It reports each search over the progress
//! channel and returns a [`NodeResolution`] that the scheduler applies.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::agents::analyst::{Analyst, ReflectionVerdict};
use crate::agents::search::SearchProvider;
use crate::core::lineage::lineage;
use crate::core::types::{Limits, NodeResolution};
use crate::state::{NodeId, NodeOutcome, ResearchState, SearchEntry};

/// Ancestor summary passed down for context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ancestor {
    pub node_id: NodeId,
    pub question: String,
    pub answer: Option<String>,
}

/// The question a worker resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub question: String,
    pub reason: String,
}

/// Immutable snapshot handed to a worker at launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerContext {
    pub node_id: NodeId,
    pub objective: String,
    /// Root first.
    pub lineage: Vec<Ancestor>,
    pub task: Task,
}

impl WorkerContext {
    /// Snapshot the context for `node_id`, or `None` if it does not exist.
    pub fn snapshot(state: &ResearchState, node_id: &str) -> Option<Self> {
        let node = state.node(node_id)?;
        Some(Self {
            node_id: node.id.clone(),
            objective: state.objective.clone(),
            lineage: lineage(state, node_id)
                .into_iter()
                .map(|ancestor| Ancestor {
                    node_id: ancestor.id.clone(),
                    question: ancestor.question.clone(),
                    answer: ancestor.answer.clone(),
                })
                .collect(),
            task: Task {
                question: node.question.clone(),
                reason: node.reason.clone(),
            },
        })
    }
}

/// Messages from workers to the scheduler, in send order per node.
#[derive(Debug)]
pub enum WorkerMessage {
    Progress {
        node_id: NodeId,
        entry: SearchEntry,
    },
    /// Sent exactly once per launched node.
    Finished {
        node_id: NodeId,
        result: Result<NodeResolution, String>,
    },
}

/// Progress reporter for one worker.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    node_id: NodeId,
    tx: Option<UnboundedSender<WorkerMessage>>,
}

impl ProgressSink {
    pub fn new(node_id: NodeId, tx: UnboundedSender<WorkerMessage>) -> Self {
        Self {
            node_id,
            tx: Some(tx),
        }
    }

    /// A sink that drops everything.
    pub fn detached(node_id: NodeId) -> Self {
        Self { node_id, tx: None }
    }

    pub fn record(&self, entry: SearchEntry) {
        if let Some(tx) = &self.tx {
            // The scheduler outlives its workers unless it was torn down; then nobody listens.
            let _ = tx.send(WorkerMessage::Progress {
                node_id: self.node_id.clone(),
                entry,
            });
        }
    }
}

/// Search budget for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub min_searches: u32,
    pub max_searches: u32,
    pub max_followups: usize,
}

impl From<&Limits> for WorkerSettings {
    fn from(limits: &Limits) -> Self {
        Self {
            min_searches: limits.min_searches,
            max_searches: limits.max_searches,
            max_followups: limits.max_followups,
        }
    }
}

/// Runs the search/reflect/conclude loop for a node.
pub struct Researcher {
    search: Arc<dyn SearchProvider>,
    analyst: Arc<dyn Analyst>,
    settings: WorkerSettings,
}

impl Researcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        analyst: Arc<dyn Analyst>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            search,
            analyst,
            settings,
        }
    }

    /// Resolve `ctx.task`.
    ///
    /// Cancellation is checked before every call and raced against it; an
    /// observed cancellation yields the fixed stopped resolution. Provider and
    /// analyst errors are returned as `Err`.
    #[instrument(skip_all, fields(node_id = %ctx.node_id))]
    pub async fn run(
        &self,
        ctx: &WorkerContext,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<NodeResolution> {
        let mut history: Vec<SearchEntry> = Vec::new();
        let mut query = ctx.task.question.clone();
        let max_searches = self.settings.max_searches.max(1);

        for searches in 1..=max_searches {
            let Some(result) = until_cancelled(cancel, self.search.search(&query)).await else {
                return Ok(NodeResolution::stopped(history));
            };
            let result = result.with_context(|| format!("search '{query}'"))?;
            if result.is_empty() {
                debug!(query = %query, "search found nothing");
            }
            debug!(searches, query = %query, sources = result.sources.len(), "search completed");

            history.push(SearchEntry {
                query: query.clone(),
                result_text: result.answer,
                sources: result.sources,
                timestamp: Utc::now(),
                reflection: None,
            });

            let Some(reflection) = until_cancelled(cancel, self.analyst.reflect(ctx, &history)).await
            else {
                return Ok(NodeResolution::stopped(history));
            };
            let reflection = reflection.context("reflect")?;

            if let Some(latest) = history.last_mut() {
                latest.reflection = (!reflection.note.trim().is_empty()).then(|| reflection.note.clone());
                progress.record(latest.clone());
            }

            let finished = match reflection.verdict {
                ReflectionVerdict::DeadEnd => true,
                ReflectionVerdict::Done => searches >= self.settings.min_searches,
                ReflectionVerdict::Continue => false,
            };
            if finished {
                debug!(searches, verdict = ?reflection.verdict, "search loop finished");
                break;
            }

            query = reflection
                .next_query
                .map(|next| next.trim().to_string())
                .filter(|next| !next.is_empty())
                .unwrap_or_else(|| format!("{} ({})", ctx.task.question, searches + 1));
        }

        let Some(conclusion) = until_cancelled(
            cancel,
            self.analyst
                .conclude(ctx, &history, self.settings.max_followups),
        )
        .await
        else {
            return Ok(NodeResolution::stopped(history));
        };
        let mut conclusion = conclusion.context("conclude")?;
        conclusion
            .suggested_followups
            .truncate(self.settings.max_followups);

        Ok(NodeResolution {
            answer: conclusion.answer,
            confidence: conclusion.confidence,
            outcome: NodeOutcome::Answered,
            suggested_followups: conclusion.suggested_followups,
            search_history: history,
        })
    }
}

/// Run `fut` unless `cancel` fires first. Returns `None` on cancellation.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    if cancel.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::agents::analyst::{Conclusion, Reflection};
    use crate::core::types::STOPPED_NODE_ANSWER;
    use crate::state::{Confidence, Followup};
    use crate::test_support::{ScriptedSearch, context_for, done_node, pending_node, state_with};

    /// Replays reflections in order, then repeats the last one.
    struct ScriptedAnalyst {
        reflections: Vec<Reflection>,
        calls: AtomicUsize,
        followups: usize,
    }

    impl ScriptedAnalyst {
        fn new(reflections: Vec<Reflection>) -> Self {
            Self {
                reflections,
                calls: AtomicUsize::new(0),
                followups: 0,
            }
        }
    }

    #[async_trait]
    impl Analyst for ScriptedAnalyst {
        async fn reflect(&self, _ctx: &WorkerContext, _history: &[SearchEntry]) -> Result<Reflection> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let pick = idx.min(self.reflections.len() - 1);
            Ok(self.reflections[pick].clone())
        }

        async fn conclude(
            &self,
            _ctx: &WorkerContext,
            history: &[SearchEntry],
            _max_followups: usize,
        ) -> Result<Conclusion> {
            Ok(Conclusion {
                answer: format!("{} searches", history.len()),
                confidence: Confidence::Medium,
                suggested_followups: (0..self.followups)
                    .map(|i| Followup {
                        question: format!("follow-up {i}"),
                        reason: "dig".to_string(),
                    })
                    .collect(),
            })
        }
    }

    fn reflection(verdict: ReflectionVerdict, next: Option<&str>) -> Reflection {
        Reflection {
            verdict,
            next_query: next.map(str::to_string),
            note: format!("{verdict:?}"),
        }
    }

    fn settings(min: u32, max: u32) -> WorkerSettings {
        WorkerSettings {
            min_searches: min,
            max_searches: max,
            max_followups: 2,
        }
    }

    fn researcher(analyst: ScriptedAnalyst, settings: WorkerSettings) -> Researcher {
        Researcher::new(Arc::new(ScriptedSearch::default()), Arc::new(analyst), settings)
    }

    #[tokio::test]
    async fn done_is_ignored_until_min_searches() {
        let analyst = ScriptedAnalyst::new(vec![reflection(ReflectionVerdict::Done, None)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = context_for("n1", "What is tokio?");

        let resolution = researcher(analyst, settings(3, 6))
            .run(&ctx, &ProgressSink::new("n1".to_string(), tx), &CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(resolution.outcome, NodeOutcome::Answered);
        assert_eq!(resolution.search_history.len(), 3);
        assert_eq!(resolution.answer, "3 searches");
        // First query is the node question; later ones fall back to numbered variants.
        assert_eq!(resolution.search_history[0].query, "What is tokio?");
        assert_eq!(resolution.search_history[1].query, "What is tokio? (2)");
        assert_eq!(resolution.search_history[0].reflection.as_deref(), Some("Done"));

        let mut progress = 0;
        while let Ok(WorkerMessage::Progress { node_id, .. }) = rx.try_recv() {
            assert_eq!(node_id, "n1");
            progress += 1;
        }
        assert_eq!(progress, 3);
    }

    #[tokio::test]
    async fn dead_end_stops_immediately() {
        let analyst = ScriptedAnalyst::new(vec![reflection(ReflectionVerdict::DeadEnd, None)]);
        let resolution = researcher(analyst, settings(3, 6))
            .run(
                &context_for("n1", "q"),
                &ProgressSink::detached("n1".to_string()),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(resolution.search_history.len(), 1);
    }

    #[tokio::test]
    async fn continue_uses_suggested_query_and_stops_at_max() {
        let analyst =
            ScriptedAnalyst::new(vec![reflection(ReflectionVerdict::Continue, Some("  refined  "))]);
        let resolution = researcher(analyst, settings(1, 2))
            .run(
                &context_for("n1", "q"),
                &ProgressSink::detached("n1".to_string()),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        let queries: Vec<_> = resolution.search_history.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["q", "refined"]);
    }

    #[tokio::test]
    async fn followups_are_bounded() {
        let mut analyst = ScriptedAnalyst::new(vec![reflection(ReflectionVerdict::DeadEnd, None)]);
        analyst.followups = 5;
        let resolution = researcher(analyst, settings(1, 1))
            .run(
                &context_for("n1", "q"),
                &ProgressSink::detached("n1".to_string()),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(resolution.suggested_followups.len(), 2);
    }

    #[tokio::test]
    async fn search_errors_propagate() {
        let search = ScriptedSearch {
            fail_matching: Some("q".to_string()),
            ..ScriptedSearch::default()
        };
        let analyst = ScriptedAnalyst::new(vec![reflection(ReflectionVerdict::Continue, None)]);
        let err = Researcher::new(Arc::new(search), Arc::new(analyst), settings(1, 3))
            .run(
                &context_for("n1", "q"),
                &ProgressSink::detached("n1".to_string()),
                &CancellationToken::new(),
            )
            .await
            .expect_err("search failure");
        assert!(format!("{err:#}").contains("search 'q'"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_search_returns_stopped() {
        let search = ScriptedSearch {
            delay: Duration::from_secs(60),
            ..ScriptedSearch::default()
        };
        let analyst = ScriptedAnalyst::new(vec![reflection(ReflectionVerdict::Continue, None)]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let resolution = Researcher::new(Arc::new(search), Arc::new(analyst), settings(1, 3))
            .run(&context_for("n1", "q"), &ProgressSink::detached("n1".to_string()), &cancel)
            .await
            .expect("run");

        assert_eq!(resolution.outcome, NodeOutcome::Stopped);
        assert_eq!(resolution.answer, STOPPED_NODE_ANSWER);
        assert_eq!(resolution.confidence, Confidence::Low);
        assert!(resolution.search_history.is_empty());
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_every_call() {
        let search = ScriptedSearch::default();
        let calls = search.calls.clone();
        let analyst = ScriptedAnalyst::new(vec![reflection(ReflectionVerdict::Done, None)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let resolution = Researcher::new(Arc::new(search), Arc::new(analyst), settings(1, 3))
            .run(&context_for("n1", "q"), &ProgressSink::detached("n1".to_string()), &cancel)
            .await
            .expect("run");

        assert_eq!(resolution.outcome, NodeOutcome::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn snapshot_captures_lineage() {
        let state = state_with(vec![done_node("n1", None, 0), pending_node("n2", Some("n1"), 1)]);
        let ctx = WorkerContext::snapshot(&state, "n2").expect("snapshot");
        assert_eq!(ctx.lineage.len(), 1);
        assert_eq!(ctx.lineage[0].node_id, "n1");
        assert!(ctx.lineage[0].answer.is_some());
        assert!(WorkerContext::snapshot(&state, "n9").is_none());
    }
}
