//! Orchestration for `delve run`.
//!
//! A run is identified by a fresh `run_id`. Its artifacts live under
//! `.delve/runs/<run-id>/`: the state file (rewritten after every change),
//! the JSON-lines event log, and transcripts of command-backed collaborator
//! calls.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::Collaborators;
use crate::events::EventSink;
use crate::io::config::{DelveConfig, load_config};
use crate::io::event_log::EventLog;
use crate::io::layout::{DelvePaths, RunPaths};
use crate::io::state_store::StateWriter;
use crate::scheduler::{ResearchRequest, RunOptions, run_research};
use crate::state::{ResearchState, generate_run_id};

/// CLI overrides applied on top of the configured limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitOverrides {
    pub max_nodes: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub max_time_secs: Option<u64>,
    pub max_depth: Option<u32>,
}

impl LimitOverrides {
    fn apply(&self, cfg: &mut DelveConfig) {
        let limits = &mut cfg.limits;
        if let Some(value) = self.max_nodes {
            limits.max_nodes = value;
        }
        if let Some(value) = self.max_concurrency {
            limits.max_concurrency = value;
        }
        if let Some(value) = self.max_time_secs {
            limits.max_time_secs = value;
        }
        if let Some(value) = self.max_depth {
            limits.max_depth = value;
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub objective: String,
    pub success_criteria: Option<String>,
    pub overrides: LimitOverrides,
}

/// Outcome of `delve run`.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub paths: RunPaths,
    pub state: ResearchState,
}

/// Load the effective config for `root`: file (or defaults) plus overrides.
pub fn effective_config(root: &Path, overrides: &LimitOverrides) -> Result<DelveConfig> {
    let paths = DelvePaths::new(root);
    let mut cfg = load_config(&paths.config_path)?;
    overrides.apply(&mut cfg);
    cfg.validate().context("invalid limits")?;
    Ok(cfg)
}

/// Run one research session in `root` until it completes or `cancel` fires.
pub async fn start_research(
    root: &Path,
    options: StartOptions,
    cancel: CancellationToken,
) -> Result<StartOutcome> {
    let cfg = effective_config(root, &options.overrides)?;
    let limits = cfg.limits.to_limits();
    let run_id = generate_run_id(Utc::now());
    let paths = DelvePaths::new(root).run(&run_id);
    paths.create()?;
    info!(run_id = %run_id, dir = %paths.dir.display(), "starting research run");

    let collaborators = Collaborators::from_config(&cfg, &limits, Some(&paths.calls_dir));
    let (events, rx) = EventSink::channel();
    let log = EventLog::create(&paths.events_path).await?;
    let log_task = tokio::spawn(log.drain(rx));

    let mut writer = StateWriter::new(&paths.state_path);
    let request = ResearchRequest {
        run_id,
        objective: options.objective,
        success_criteria: options
            .success_criteria
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
        limits,
    };
    let result = run_research(
        request,
        &collaborators,
        RunOptions {
            cancel,
            events,
            observer: &mut writer,
        },
    )
    .await;

    // The sink was moved into the run, so the log sees end-of-stream here.
    match log_task.await {
        Ok(Ok(written)) => debug!(written, "event log closed"),
        Ok(Err(err)) => warn!(error = %format!("{err:#}"), "event log failed"),
        Err(err) => warn!(error = %err, "event log task failed"),
    }

    let state = result?;
    Ok(StartOutcome { paths, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{StaticEntryConfig, write_config};
    use crate::io::state_store::load_state;
    use crate::state::{ResearchStatus, Source};

    #[test]
    fn overrides_replace_configured_limits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let overrides = LimitOverrides {
            max_nodes: Some(4),
            max_depth: Some(1),
            ..LimitOverrides::default()
        };
        let cfg = effective_config(temp.path(), &overrides).expect("config");
        assert_eq!(cfg.limits.max_nodes, 4);
        assert_eq!(cfg.limits.max_depth, 1);
        assert_eq!(cfg.limits.max_concurrency, DelveConfig::default().limits.max_concurrency);

        let zero = LimitOverrides {
            max_concurrency: Some(0),
            ..LimitOverrides::default()
        };
        assert!(effective_config(temp.path(), &zero).is_err());
    }

    #[tokio::test]
    async fn run_persists_state_and_events() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let mut cfg = DelveConfig::default();
        cfg.limits.min_searches = 1;
        cfg.limits.max_searches = 2;
        cfg.cortex.target_nodes = 3;
        cfg.search.entries.push(StaticEntryConfig {
            pattern: "tokio".to_string(),
            answer: "Tokio is an async runtime.".to_string(),
            sources: vec![Source {
                title: "tokio.rs".to_string(),
                url: Some("https://tokio.rs".to_string()),
            }],
        });
        write_config(&DelvePaths::new(root).config_path, &cfg).expect("write config");

        let outcome = start_research(
            root,
            StartOptions {
                objective: "What is tokio?".to_string(),
                success_criteria: Some("  ".to_string()),
                overrides: LimitOverrides::default(),
            },
            CancellationToken::new(),
        )
        .await
        .expect("run");

        assert_eq!(outcome.state.status, ResearchStatus::Complete);
        assert_eq!(outcome.state.success_criteria, None);
        assert!(outcome.state.nodes.len() <= 3);
        let persisted = load_state(&outcome.paths.state_path).expect("load state");
        assert_eq!(persisted, outcome.state);

        let events = std::fs::read_to_string(&outcome.paths.events_path).expect("events");
        let last = events.lines().last().expect("at least one event");
        assert!(last.contains("\"type\":\"research_complete\""));
    }
}
