//! Test-only builders and scripted collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::agents::Collaborators;
use crate::agents::cortex::{DecisionAuthority, DecisionError, FinishInput};
use crate::agents::researcher::{Task, WorkerContext};
use crate::agents::rules::HeuristicAnalyst;
use crate::agents::search::{SearchProvider, SearchResult};
use crate::core::types::{Decision, Limits, SpawnRequest};
use crate::state::{
    Confidence, Finding, FindingSource, NodeId, NodeOutcome, NodeStatus, ResearchNode,
    ResearchState, SearchEntry, Source,
};

/// Fixed timestamp `secs` after a deterministic epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

/// A running state with the given nodes and nothing else.
pub fn state_with(nodes: Vec<ResearchNode>) -> ResearchState {
    let mut state = ResearchState::new("run-test", "Understand async Rust", None, at(0));
    state.nodes = nodes;
    state
}

pub fn pending_node(id: &str, parent: Option<&str>, depth: u32) -> ResearchNode {
    ResearchNode {
        id: id.to_string(),
        parent_id: parent.map(str::to_string),
        question: format!("{id} question"),
        reason: format!("{id} reason"),
        depth,
        status: NodeStatus::Pending,
        created_at: at(0),
        started_at: None,
        completed_at: None,
        answer: None,
        confidence: None,
        outcome: None,
        suggested_followups: Vec::new(),
        search_history: Vec::new(),
    }
}

/// An answered node with medium confidence.
pub fn done_node(id: &str, parent: Option<&str>, depth: u32) -> ResearchNode {
    ResearchNode {
        status: NodeStatus::Done,
        started_at: Some(at(1)),
        completed_at: Some(at(2)),
        answer: Some(format!("{id} answer")),
        confidence: Some(Confidence::Medium),
        outcome: Some(NodeOutcome::Answered),
        ..pending_node(id, parent, depth)
    }
}

/// A search entry without sources or reflection.
pub fn entry(query: &str, text: &str) -> SearchEntry {
    SearchEntry {
        query: query.to_string(),
        result_text: text.to_string(),
        sources: Vec::new(),
        timestamp: at(0),
        reflection: None,
    }
}

pub fn finding(key: &str, content: &str) -> Finding {
    Finding {
        key: key.to_string(),
        title: format!("{key} title"),
        content: content.to_string(),
        confidence: Confidence::Medium,
        sources: vec![FindingSource {
            title: format!("{key} source"),
            url: Some(format!("https://example.com/{key}")),
            node_id: Some("n1".to_string()),
        }],
        updated_at: at(0),
    }
}

/// Worker context for a root node.
pub fn context_for(id: &str, question: &str) -> WorkerContext {
    WorkerContext {
        node_id: id.to_string(),
        objective: "Understand async Rust".to_string(),
        lineage: Vec::new(),
        task: Task {
            question: question.to_string(),
            reason: "test".to_string(),
        },
    }
}

/// Small limits that keep scheduler tests quick.
pub fn quick_limits() -> Limits {
    Limits {
        max_nodes: 12,
        max_concurrency: 3,
        max_time: Duration::from_secs(60),
        max_depth: 3,
        max_spawn_per_decision: 3,
        min_searches: 1,
        max_searches: 2,
        max_followups: 2,
    }
}

pub fn spawn_request(question: &str, parent: Option<&str>) -> SpawnRequest {
    SpawnRequest {
        question: question.to_string(),
        reason: format!("because {question}"),
        parent_id: parent.map(str::to_string),
    }
}

/// Scripted collaborators around `cortex` and `search` with the heuristic analyst.
pub fn collaborators(cortex: Arc<ScriptedCortex>, search: ScriptedSearch) -> Collaborators {
    Collaborators::new(cortex, Arc::new(search), Arc::new(HeuristicAnalyst))
}

/// Search provider with scripted latency and failures.
///
/// Every query returns `result for <query>` with one source unless a
/// `*_matching` pattern occurs in it.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSearch {
    pub delay: Duration,
    pub fail_matching: Option<String>,
    pub panic_matching: Option<String>,
    pub slow_matching: Option<(String, Duration)>,
    /// Fail the first call this provider sees, whatever the query.
    pub fail_first_call: bool,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = match &self.slow_matching {
            Some((pattern, slow)) if query.contains(pattern.as_str()) => *slow,
            _ => self.delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_first_call && call == 0 {
            bail!("scripted first-call failure for '{query}'");
        }
        if let Some(pattern) = &self.fail_matching
            && query.contains(pattern.as_str())
        {
            bail!("scripted failure for '{query}'");
        }
        if let Some(pattern) = &self.panic_matching
            && query.contains(pattern.as_str())
        {
            panic!("scripted panic for '{query}'");
        }
        Ok(SearchResult {
            answer: format!("result for {query}"),
            sources: vec![Source {
                title: format!("source for {query}"),
                url: Some("https://example.com/search".to_string()),
            }],
        })
    }
}

type Rule = dyn Fn(&ResearchState, Option<&str>) -> Result<Decision, DecisionError> + Send + Sync;

/// Decision authority driven by a closure.
///
/// Tracks how many `evaluate` calls overlap so tests can assert that the
/// scheduler never runs two at once.
pub struct ScriptedCortex {
    rule: Box<Rule>,
    delay: Duration,
    fail_finish: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    evaluations: AtomicUsize,
    triggers: std::sync::Mutex<Vec<Option<NodeId>>>,
}

impl ScriptedCortex {
    pub fn new(
        rule: impl Fn(&ResearchState, Option<&str>) -> Result<Decision, DecisionError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            rule: Box::new(rule),
            delay: Duration::ZERO,
            fail_finish: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            evaluations: AtomicUsize::new(0),
            triggers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every `evaluate`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// The `completed` argument of every `evaluate`, in call order.
    pub fn triggers(&self) -> Vec<Option<NodeId>> {
        self.triggers.lock().expect("triggers lock").clone()
    }
}

#[async_trait]
impl DecisionAuthority for ScriptedCortex {
    async fn evaluate(
        &self,
        state: &ResearchState,
        completed: Option<&str>,
    ) -> Result<Decision, DecisionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.triggers
            .lock()
            .expect("triggers lock")
            .push(completed.map(str::to_string));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.rule)(state, completed)
    }

    async fn finish(&self, state: &ResearchState, input: &FinishInput) -> Result<String, DecisionError> {
        if self.fail_finish {
            return Err(DecisionError::Backend(anyhow::anyhow!("scripted finish failure")));
        }
        let evidence = match input {
            FinishInput::Findings(findings) => findings.len(),
            FinishInput::NodeAnswers(answers) => answers.len(),
        };
        Ok(format!(
            "{} answered from {evidence} pieces of evidence",
            state.objective
        ))
    }
}
