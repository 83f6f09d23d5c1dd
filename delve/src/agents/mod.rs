//! Collaborators of the scheduler: decision authority, analyst, search provider.

use std::path::Path;
use std::sync::Arc;

use crate::core::types::Limits;
use crate::io::config::{AnalystBackend, CortexBackend, DelveConfig, SearchBackend};
use crate::io::transcript::Transcript;

pub mod analyst;
pub mod command;
pub mod cortex;
pub mod payload;
pub mod researcher;
pub mod rules;
pub mod search;

use analyst::Analyst;
use command::{AgentCommand, CommandAnalyst, CommandCortex, CommandSearch};
use cortex::DecisionAuthority;
use rules::{HeuristicAnalyst, RuleCortex};
use search::{SearchProvider, StaticSearch};

/// The three seams a run depends on, shared with every worker.
#[derive(Clone)]
pub struct Collaborators {
    pub cortex: Arc<dyn DecisionAuthority>,
    pub search: Arc<dyn SearchProvider>,
    pub analyst: Arc<dyn Analyst>,
}

impl Collaborators {
    pub fn new(
        cortex: Arc<dyn DecisionAuthority>,
        search: Arc<dyn SearchProvider>,
        analyst: Arc<dyn Analyst>,
    ) -> Self {
        Self {
            cortex,
            search,
            analyst,
        }
    }

    /// Build the configured backends. Command calls are transcribed into
    /// `calls_dir` when given.
    pub fn from_config(cfg: &DelveConfig, limits: &Limits, calls_dir: Option<&Path>) -> Self {
        let transcript = calls_dir.map(|dir| Arc::new(Transcript::new(dir)));
        let command = |argv: &[String]| {
            AgentCommand::new(argv.to_vec(), &cfg.agent).with_transcript(transcript.clone())
        };
        let budget = cfg.agent.prompt_budget_bytes;

        let cortex: Arc<dyn DecisionAuthority> = match cfg.cortex.backend {
            CortexBackend::Rules => Arc::new(RuleCortex::new(
                cfg.cortex.seeds.clone(),
                cfg.cortex.target_nodes,
                cfg.cortex.followups_per_node,
            )),
            CortexBackend::Command => Arc::new(CommandCortex::new(
                command(&cfg.cortex.command),
                budget,
                limits.clone(),
            )),
        };
        let analyst: Arc<dyn Analyst> = match cfg.analyst.backend {
            AnalystBackend::Heuristic => Arc::new(HeuristicAnalyst),
            AnalystBackend::Command => {
                Arc::new(CommandAnalyst::new(command(&cfg.analyst.command), budget))
            }
        };
        let search: Arc<dyn SearchProvider> = match cfg.search.backend {
            SearchBackend::Static => Arc::new(StaticSearch::new(cfg.search.entries.clone())),
            SearchBackend::Command => Arc::new(CommandSearch::new(command(&cfg.search.command))),
        };

        Self::new(cortex, search, analyst)
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
