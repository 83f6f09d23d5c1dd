//! The research scheduler.
//!
//! One control loop owns the [`ResearchState`]. Workers run as tokio tasks and
//! report back over a single channel; the loop drains one completion at a
//! time, consults the decision authority, applies its ledger updates, and
//! admits new nodes through the guardrails in `core::spawn`. The decision
//! authority is awaited inline, so at most one call is ever in flight.
//!
//! Stop conditions, in the order they are checked:
//! - cancellation aborts workers at once and marks the run `stopped`;
//! - the wall-clock deadline cancels the workers' token, drains their
//!   cooperative results for a short grace period, then aborts the rest;
//! - a `done` verdict, a spent node budget, or a failed decision closes the
//!   spawn gate while in-flight nodes finish normally.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::agents::Collaborators;
use crate::agents::cortex::{DecisionError, FinishInput, render_report};
use crate::agents::researcher::{ProgressSink, Researcher, WorkerContext, WorkerMessage, WorkerSettings};
use crate::core::budget::Budget;
use crate::core::findings::apply_findings_updates;
use crate::core::spawn::{
    REASON_DECISION_DONE, REASON_SPAWNING_STOPPED, SpawnGate, node_budget_spent, plan_spawns,
};
use crate::core::transitions::{insert_node, mark_done, mark_running, record_search, skip_pending};
use crate::core::types::{Decision, Limits, NodeResolution, Verdict};
use crate::events::{EventSink, ResearchEvent};
use crate::state::{
    DecisionKind, DecisionRecord, DecisionTrigger, NodeId, NodeStatus, ResearchState,
    ResearchStatus, StopReason,
};

/// Final answer of a cancelled run.
pub const STOPPED_RUN_ANSWER: &str = "Research was stopped before completion.";

/// How long workers get to return their stopped result after the deadline.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Receives the state after every mutation.
pub trait StateObserver: Send {
    fn state_changed(&mut self, state: &ResearchState) -> Result<()>;
}

/// Observer that ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StateObserver for NoopObserver {
    fn state_changed(&mut self, _state: &ResearchState) -> Result<()> {
        Ok(())
    }
}

/// What to research.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub run_id: String,
    pub objective: String,
    pub success_criteria: Option<String>,
    pub limits: Limits,
}

/// Run-scoped plumbing: cancellation, event delivery, persistence.
pub struct RunOptions<'a> {
    pub cancel: CancellationToken,
    pub events: EventSink,
    pub observer: &'a mut dyn StateObserver,
}

/// Drive a research run to completion, a guardrail, or cancellation.
///
/// Errors are reserved for bad requests and scheduler bugs (illegal node
/// transitions). Collaborator failures are recorded in the state instead.
pub async fn run_research<'a>(
    request: ResearchRequest,
    collaborators: &'a Collaborators,
    options: RunOptions<'a>,
) -> Result<ResearchState> {
    validate_request(&request)?;
    let scheduler = Scheduler::new(request, collaborators, options);
    scheduler.run().await
}

fn validate_request(request: &ResearchRequest) -> Result<()> {
    if request.objective.trim().is_empty() {
        bail!("objective must not be empty");
    }
    if request.limits.max_concurrency == 0 {
        bail!("max_concurrency must be > 0");
    }
    if request.limits.max_nodes == 0 {
        bail!("max_nodes must be > 0");
    }
    Ok(())
}

/// Why the control loop woke up.
enum Wake {
    Cancelled,
    Deadline,
    GraceExpired,
    Message(WorkerMessage),
}

/// Result of an authority call raced against cancellation and the deadline.
enum Raced<T> {
    Cancelled,
    TimedOut,
    Done(T),
}

/// Whether the loop keeps going after handling an event.
enum Flow {
    Continue,
    Cancelled,
}

struct Scheduler<'a> {
    state: ResearchState,
    limits: Limits,
    collaborators: &'a Collaborators,
    researcher: Arc<Researcher>,
    events: EventSink,
    observer: &'a mut dyn StateObserver,
    cancel: CancellationToken,
    /// Shared by in-flight workers; fired on the deadline and on cancellation.
    workers_cancel: CancellationToken,
    budget: Budget,
    grace_deadline: Option<Instant>,
    tasks: JoinSet<()>,
    tx: UnboundedSender<WorkerMessage>,
    rx: UnboundedReceiver<WorkerMessage>,
    /// First reason spawning stopped.
    stop: Option<StopReason>,
    timed_out: bool,
}

impl<'a> Scheduler<'a> {
    fn new(
        request: ResearchRequest,
        collaborators: &'a Collaborators,
        options: RunOptions<'a>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let researcher = Researcher::new(
            Arc::clone(&collaborators.search),
            Arc::clone(&collaborators.analyst),
            WorkerSettings::from(&request.limits),
        );
        Self {
            state: ResearchState::new(
                request.run_id,
                request.objective.trim(),
                request.success_criteria,
                Utc::now(),
            ),
            budget: Budget::starting_now(request.limits.max_time),
            limits: request.limits,
            collaborators,
            researcher: Arc::new(researcher),
            events: options.events,
            observer: options.observer,
            workers_cancel: options.cancel.child_token(),
            cancel: options.cancel,
            grace_deadline: None,
            tasks: JoinSet::new(),
            tx,
            rx,
            stop: None,
            timed_out: false,
        }
    }

    async fn run(mut self) -> Result<ResearchState> {
        info!(
            run_id = %self.state.run_id,
            max_nodes = self.limits.max_nodes,
            max_concurrency = self.limits.max_concurrency,
            max_time_secs = self.limits.max_time.as_secs(),
            "research started"
        );
        self.notify();

        if let Flow::Cancelled = self.consult(None).await? {
            return self.stop_cancelled();
        }

        loop {
            self.launch_pending()?;
            if self.state.count_with_status(NodeStatus::Running) == 0 {
                break;
            }
            let flow = match self.next_wake().await? {
                Wake::Cancelled => Flow::Cancelled,
                Wake::Deadline => {
                    self.on_time_limit();
                    Flow::Continue
                }
                Wake::GraceExpired => {
                    self.abandon_running()?;
                    Flow::Continue
                }
                Wake::Message(message) => self.handle_message(message).await?,
            };
            if let Flow::Cancelled = flow {
                return self.stop_cancelled();
            }
            while self.tasks.try_join_next().is_some() {}
        }

        self.conclude().await
    }

    async fn next_wake(&mut self) -> Result<Wake> {
        let cancel = self.cancel.clone();
        let deadline = self.budget.deadline();
        let grace = self.grace_deadline;
        let wake = tokio::select! {
            biased;
            () = cancel.cancelled() => Wake::Cancelled,
            () = sleep_until(deadline), if !self.timed_out => Wake::Deadline,
            () = sleep_until(grace.unwrap_or(deadline)), if grace.is_some() => Wake::GraceExpired,
            message = self.rx.recv() => match message {
                Some(message) => Wake::Message(message),
                None => return Err(anyhow!("worker channel closed")),
            },
        };
        Ok(wake)
    }

    async fn handle_message(&mut self, message: WorkerMessage) -> Result<Flow> {
        match message {
            WorkerMessage::Progress { node_id, entry } => {
                let query = entry.query.clone();
                let source_count = entry.sources.len();
                if record_search(&mut self.state, &node_id, entry)? {
                    self.events.emit(ResearchEvent::SearchCompleted {
                        node_id,
                        query,
                        source_count,
                    });
                    self.notify();
                }
                Ok(Flow::Continue)
            }
            WorkerMessage::Finished { node_id, result } => {
                let resolution = match result {
                    Ok(resolution) => resolution,
                    Err(error) => {
                        warn!(node = %node_id, error = %error, "worker failed");
                        NodeResolution::failed(&error, Vec::new())
                    }
                };
                mark_done(&mut self.state, &node_id, resolution, Utc::now())?;
                self.emit_node_done(&node_id);
                self.notify();

                if self.timed_out || self.stop == Some(StopReason::DecisionFailed) {
                    debug!(node = %node_id, "not consulting after stop");
                    return Ok(Flow::Continue);
                }
                self.consult(Some(node_id)).await
            }
        }
    }

    /// Ask the authority what to do next and apply the answer.
    async fn consult(&mut self, completed: Option<NodeId>) -> Result<Flow> {
        let raced = self.race_evaluate(completed.as_deref()).await;
        let trigger = match completed {
            Some(node_id) => DecisionTrigger::Node { node_id },
            None => DecisionTrigger::Initial,
        };
        match raced {
            Raced::Cancelled => return Ok(Flow::Cancelled),
            Raced::TimedOut => {
                info!(trigger = ?trigger, "decision abandoned at the deadline");
                self.on_time_limit();
            }
            Raced::Done(Ok(decision)) => self.apply_decision(trigger, decision),
            Raced::Done(Err(err)) => self.record_failed_decision(trigger, &err),
        }
        Ok(Flow::Continue)
    }

    async fn race_evaluate(&self, completed: Option<&str>) -> Raced<Result<Decision, DecisionError>> {
        let cortex = &self.collaborators.cortex;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Raced::Cancelled,
            () = sleep_until(self.budget.deadline()), if !self.timed_out => Raced::TimedOut,
            result = cortex.evaluate(&self.state, completed) => Raced::Done(result),
        }
    }

    fn apply_decision(&mut self, trigger: DecisionTrigger, decision: Decision) {
        let now = Utc::now();
        let merge = apply_findings_updates(
            &mut self.state.findings,
            &decision.findings_updates,
            trigger.node_id(),
            now,
        );
        if !merge.ignored.is_empty() {
            debug!(keys = ?merge.ignored, "ignored finding updates");
        }

        let gate = match (self.stop, decision.verdict) {
            (Some(_), _) => SpawnGate::Closed(REASON_SPAWNING_STOPPED),
            (None, Verdict::Done) => SpawnGate::Closed(REASON_DECISION_DONE),
            (None, Verdict::Spawn) => SpawnGate::Open,
        };
        let plan = plan_spawns(&self.state, &decision.nodes_to_spawn, &self.limits, gate);
        for rejected in &plan.rejected {
            warn!(
                question = %rejected.question,
                parent = ?rejected.parent_id,
                reason = %rejected.reason,
                "spawn rejected"
            );
        }
        let spawned: Vec<NodeId> = plan
            .accepted
            .iter()
            .map(|spawn| insert_node(&mut self.state, spawn, now))
            .collect();

        let kind = match decision.verdict {
            Verdict::Spawn => DecisionKind::Spawn,
            Verdict::Done => DecisionKind::Done,
        };
        self.record_decision(DecisionRecord {
            seq: self.state.next_decision_seq(),
            at: now,
            trigger,
            reasoning: decision.reasoning,
            decision: kind,
            spawned,
            rejected: plan.rejected,
            findings_applied: merge.applied(),
            error: None,
        });

        if decision.verdict == Verdict::Done {
            self.set_stop(StopReason::DecidedDone);
        }
        if node_budget_spent(&self.state, &self.limits) {
            self.set_stop(StopReason::NodeLimit);
        }
        self.notify();
    }

    fn record_failed_decision(&mut self, trigger: DecisionTrigger, err: &DecisionError) {
        warn!(trigger = ?trigger, error = %err, "decision authority failed");
        self.record_decision(DecisionRecord {
            seq: self.state.next_decision_seq(),
            at: Utc::now(),
            trigger,
            reasoning: String::new(),
            decision: DecisionKind::Done,
            spawned: Vec::new(),
            rejected: Vec::new(),
            findings_applied: 0,
            error: Some(err.to_string()),
        });
        self.set_stop(StopReason::DecisionFailed);
        self.notify();
    }

    fn record_decision(&mut self, record: DecisionRecord) {
        info!(
            seq = record.seq,
            decision = ?record.decision,
            spawned = record.spawned.len(),
            rejected = record.rejected.len(),
            findings_applied = record.findings_applied,
            "decision recorded"
        );
        self.events.emit(ResearchEvent::DecisionMade {
            seq: record.seq,
            trigger: record.trigger.node_id().map(str::to_string),
            decision: record.decision,
            spawned: record.spawned.clone(),
            rejected: record.rejected.len(),
            findings_applied: record.findings_applied,
        });
        self.state.decision_log.push(record);
    }

    fn set_stop(&mut self, reason: StopReason) {
        if self.stop.is_none() {
            info!(?reason, "spawning stopped");
            self.stop = Some(reason);
        }
    }

    fn on_time_limit(&mut self) {
        if self.timed_out {
            return;
        }
        info!("time limit reached, stopping workers");
        self.timed_out = true;
        self.set_stop(StopReason::TimeLimit);
        self.workers_cancel.cancel();
        self.grace_deadline = Some(Instant::now() + DRAIN_GRACE);
    }

    /// Launch pending nodes in creation order up to the concurrency limit.
    fn launch_pending(&mut self) -> Result<()> {
        let launching = !self.timed_out && matches!(self.stop, None | Some(StopReason::NodeLimit));
        if !launching {
            return Ok(());
        }
        let running = self.state.count_with_status(NodeStatus::Running);
        let slots = self.limits.max_concurrency.saturating_sub(running);
        for id in self.state.pending_ids().into_iter().take(slots) {
            self.launch(&id)?;
        }
        Ok(())
    }

    fn launch(&mut self, id: &str) -> Result<()> {
        let ctx = WorkerContext::snapshot(&self.state, id)
            .ok_or_else(|| anyhow!("node '{id}' missing at launch"))?;
        mark_running(&mut self.state, id, Utc::now())?;
        if let Some(node) = self.state.node(id) {
            self.events.emit(ResearchEvent::NodeStarted {
                node_id: node.id.clone(),
                parent_id: node.parent_id.clone(),
                question: node.question.clone(),
                depth: node.depth,
            });
        }
        self.notify();

        let researcher = Arc::clone(&self.researcher);
        let progress = ProgressSink::new(id.to_string(), self.tx.clone());
        let cancel = self.workers_cancel.clone();
        let tx = self.tx.clone();
        let node_id = id.to_string();
        let span = info_span!("worker", node_id = %id);
        self.tasks.spawn(
            async move {
                let outcome = AssertUnwindSafe(researcher.run(&ctx, &progress, &cancel))
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(Ok(resolution)) => Ok(resolution),
                    Ok(Err(err)) => Err(format!("{err:#}")),
                    Err(panic) => Err(panic_message(panic.as_ref())),
                };
                // The receiver only goes away once the run has given up on this node.
                let _ = tx.send(WorkerMessage::Finished { node_id, result });
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Abort workers that ignored the deadline and close their nodes as stopped.
    fn abandon_running(&mut self) -> Result<()> {
        self.tasks.abort_all();
        let running: Vec<NodeId> = self
            .state
            .nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Running)
            .map(|node| node.id.clone())
            .collect();
        if !running.is_empty() {
            warn!(nodes = ?running, "abandoning workers after drain grace");
        }
        let now = Utc::now();
        for id in running {
            mark_done(&mut self.state, &id, NodeResolution::stopped(Vec::new()), now)?;
            self.emit_node_done(&id);
        }
        self.notify();
        Ok(())
    }

    fn skip_unlaunched(&mut self) {
        for id in skip_pending(&mut self.state, Utc::now()) {
            debug!(node = %id, "skipped");
            self.emit_node_done(&id);
        }
    }

    fn emit_node_done(&self, id: &str) {
        let Some(node) = self.state.node(id) else {
            return;
        };
        if let (Some(outcome), Some(confidence)) = (node.outcome, node.confidence) {
            self.events.emit(ResearchEvent::NodeDone {
                node_id: node.id.clone(),
                outcome,
                confidence,
            });
        }
    }

    /// Synthesize the final answer once every node has settled.
    async fn conclude(mut self) -> Result<ResearchState> {
        self.skip_unlaunched();
        let reason = self.stop.unwrap_or_else(|| {
            if node_budget_spent(&self.state, &self.limits) {
                StopReason::NodeLimit
            } else {
                StopReason::Exhausted
            }
        });
        self.state.stop_reason = Some(reason);
        self.notify();

        let input = FinishInput::from_state(&self.state);
        let finished = {
            let cortex = &self.collaborators.cortex;
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = cortex.finish(&self.state, &input) => Some(result),
            }
        };
        let Some(finished) = finished else {
            return self.stop_cancelled();
        };

        let (answer, error) = match finished {
            Ok(answer) if !answer.trim().is_empty() => (answer, None),
            Ok(_) => (
                render_report(&self.state.objective, &input),
                Some("finish returned an empty answer".to_string()),
            ),
            Err(err) => {
                warn!(error = %err, "finish failed, using fallback report");
                (render_report(&self.state.objective, &input), Some(err.to_string()))
            }
        };
        self.record_decision(DecisionRecord {
            seq: self.state.next_decision_seq(),
            at: Utc::now(),
            trigger: DecisionTrigger::Finish,
            reasoning: String::new(),
            decision: DecisionKind::Finish,
            spawned: Vec::new(),
            rejected: Vec::new(),
            findings_applied: 0,
            error,
        });

        self.state.status = ResearchStatus::Complete;
        self.state.final_answer = Some(answer.clone());
        self.state.finished_at = Some(Utc::now());
        self.events.emit(ResearchEvent::ResearchComplete {
            stop_reason: reason,
            final_answer: answer,
        });
        self.notify();
        info!(
            run_id = %self.state.run_id,
            ?reason,
            nodes = self.state.nodes.len(),
            findings = self.state.findings.len(),
            "research complete"
        );
        Ok(self.state)
    }

    /// Cancellation: abort workers, settle every node, mark the run stopped.
    fn stop_cancelled(mut self) -> Result<ResearchState> {
        info!(run_id = %self.state.run_id, "research cancelled");
        self.workers_cancel.cancel();
        self.tasks.abort_all();
        let now = Utc::now();
        let running: Vec<NodeId> = self
            .state
            .nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Running)
            .map(|node| node.id.clone())
            .collect();
        for id in running {
            mark_done(&mut self.state, &id, NodeResolution::stopped(Vec::new()), now)?;
            self.emit_node_done(&id);
        }
        self.skip_unlaunched();

        self.state.status = ResearchStatus::Stopped;
        self.state.stop_reason = Some(StopReason::Cancelled);
        self.state.final_answer = Some(STOPPED_RUN_ANSWER.to_string());
        self.state.finished_at = Some(now);
        self.events.emit(ResearchEvent::ResearchStopped {
            final_answer: STOPPED_RUN_ANSWER.to_string(),
        });
        self.notify();
        Ok(self.state)
    }

    fn notify(&mut self) {
        if let Err(err) = self.observer.state_changed(&self.state) {
            warn!(error = %format!("{err:#}"), "state observer failed");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "worker panicked: boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "worker panicked: owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "worker panicked: unknown panic");
    }

    #[test]
    fn requests_need_an_objective_and_capacity() {
        let mut request = ResearchRequest {
            run_id: "run-test".to_string(),
            objective: "  ".to_string(),
            success_criteria: None,
            limits: Limits::default(),
        };
        assert!(validate_request(&request).is_err());

        request.objective = "Explain tokio".to_string();
        assert!(validate_request(&request).is_ok());

        request.limits.max_concurrency = 0;
        assert!(validate_request(&request).is_err());
    }
}
