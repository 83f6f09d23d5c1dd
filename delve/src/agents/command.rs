//! Collaborators backed by external agent commands.
//!
//! Prompts go to the command on stdin; the reply is read from stdout and
//! validated at the boundary (`agents::payload`). Search commands receive the
//! query as their last argument instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::agents::analyst::{Analyst, Conclusion, Reflection};
use crate::agents::cortex::{DecisionAuthority, DecisionError, FinishInput};
use crate::agents::payload::{
    parse_answer, parse_conclusion, parse_decision, parse_reflection, parse_search_result,
};
use crate::agents::researcher::WorkerContext;
use crate::agents::search::{SearchProvider, SearchResult};
use crate::core::types::{Decision, Limits};
use crate::io::config::AgentConfig;
use crate::io::process::run_command;
use crate::io::prompt::{PromptBuilder, PromptLimits};
use crate::io::transcript::Transcript;
use crate::state::{ResearchState, SearchEntry};

/// One configured agent command plus its call budget.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    transcript: Option<Arc<Transcript>>,
}

impl AgentCommand {
    pub fn new(argv: Vec<String>, settings: &AgentConfig) -> Self {
        Self {
            argv,
            timeout: Duration::from_secs(settings.timeout_secs),
            output_limit_bytes: settings.output_limit_bytes,
            transcript: None,
        }
    }

    pub fn with_transcript(mut self, transcript: Option<Arc<Transcript>>) -> Self {
        self.transcript = transcript;
        self
    }

    /// Run the command with `prompt` on stdin and return its stdout.
    pub async fn call(&self, label: &str, prompt: &str) -> Result<String> {
        self.exec(label, &self.argv, Some(prompt)).await
    }

    /// Run the command with `arg` appended to its argv.
    pub async fn call_with_arg(&self, label: &str, arg: &str) -> Result<String> {
        let mut argv = self.argv.clone();
        argv.push(arg.to_string());
        self.exec(label, &argv, None).await
    }

    async fn exec(&self, label: &str, argv: &[String], stdin: Option<&str>) -> Result<String> {
        let output = run_command(
            argv,
            stdin.map(str::as_bytes),
            self.timeout,
            self.output_limit_bytes,
        )
        .await?;
        let stdout = output.stdout_text();
        if let Some(transcript) = &self.transcript {
            let input = stdin.unwrap_or_else(|| argv.last().map_or("", String::as_str));
            if let Err(err) = transcript.record(label, input, &stdout) {
                warn!(label, error = %err, "failed to record call transcript");
            }
        }
        if let Some(failure) = output.failure(label, self.timeout) {
            return Err(anyhow!(failure));
        }
        debug!(label, bytes = stdout.len(), "agent command finished");
        Ok(stdout)
    }
}

/// Decision authority that delegates to an agent command.
#[derive(Debug, Clone)]
pub struct CommandCortex {
    command: AgentCommand,
    prompts: PromptBuilder,
    limits: Limits,
}

impl CommandCortex {
    pub fn new(command: AgentCommand, prompt_budget_bytes: usize, limits: Limits) -> Self {
        Self {
            command,
            prompts: PromptBuilder::new(prompt_budget_bytes),
            limits,
        }
    }

    fn prompt_limits(&self, state: &ResearchState) -> PromptLimits {
        PromptLimits {
            max_spawn_per_decision: self.limits.max_spawn_per_decision,
            remaining_nodes: self.limits.max_nodes.saturating_sub(state.nodes.len()),
            max_depth: self.limits.max_depth,
        }
    }
}

#[async_trait]
impl DecisionAuthority for CommandCortex {
    #[instrument(skip_all, fields(completed = completed.unwrap_or("initial")))]
    async fn evaluate(
        &self,
        state: &ResearchState,
        completed: Option<&str>,
    ) -> Result<Decision, DecisionError> {
        let prompt = self
            .prompts
            .build_evaluate(state, completed, self.prompt_limits(state))?;
        let raw = self.command.call("cortex-evaluate", prompt.render()).await?;
        Ok(parse_decision(&raw)?)
    }

    #[instrument(skip_all)]
    async fn finish(&self, state: &ResearchState, input: &FinishInput) -> Result<String, DecisionError> {
        let prompt = self.prompts.build_finish(state, input)?;
        let raw = self.command.call("cortex-finish", prompt.render()).await?;
        Ok(parse_answer(&raw)?)
    }
}

/// Analyst that delegates reflect and conclude to an agent command.
#[derive(Debug, Clone)]
pub struct CommandAnalyst {
    command: AgentCommand,
    prompts: PromptBuilder,
}

impl CommandAnalyst {
    pub fn new(command: AgentCommand, prompt_budget_bytes: usize) -> Self {
        Self {
            command,
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }
}

#[async_trait]
impl Analyst for CommandAnalyst {
    #[instrument(skip_all, fields(node_id = %ctx.node_id, searches = history.len()))]
    async fn reflect(&self, ctx: &WorkerContext, history: &[SearchEntry]) -> Result<Reflection> {
        let prompt = self.prompts.build_reflect(ctx, history)?;
        let label = format!("analyst-reflect-{}", ctx.node_id);
        let raw = self.command.call(&label, prompt.render()).await?;
        Ok(parse_reflection(&raw)?)
    }

    #[instrument(skip_all, fields(node_id = %ctx.node_id, searches = history.len()))]
    async fn conclude(
        &self,
        ctx: &WorkerContext,
        history: &[SearchEntry],
        max_followups: usize,
    ) -> Result<Conclusion> {
        let prompt = self.prompts.build_conclude(ctx, history, max_followups)?;
        let label = format!("analyst-conclude-{}", ctx.node_id);
        let raw = self.command.call(&label, prompt.render()).await?;
        Ok(parse_conclusion(&raw)?)
    }
}

/// Search provider that runs a command with the query as its last argument.
#[derive(Debug, Clone)]
pub struct CommandSearch {
    command: AgentCommand,
}

impl CommandSearch {
    pub fn new(command: AgentCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl SearchProvider for CommandSearch {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<SearchResult> {
        let raw = self.command.call_with_arg("search", query).await?;
        Ok(parse_search_result(&raw)?)
    }
}
