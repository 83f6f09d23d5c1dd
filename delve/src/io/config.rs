//! Delve configuration stored under `.delve/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Limits;
use crate::state::Source;

/// Delve configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// run fully offline (rule-based cortex, heuristic analyst, static search).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelveConfig {
    pub limits: LimitsConfig,
    pub agent: AgentConfig,
    pub cortex: CortexConfig,
    pub analyst: AnalystConfig,
    pub search: SearchConfig,
}

/// Guardrails for one run. CLI flags override these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_nodes: usize,
    pub max_concurrency: usize,
    /// Wall-clock budget for the whole run, in seconds.
    pub max_time_secs: u64,
    pub max_depth: u32,
    pub max_spawn_per_decision: usize,
    pub min_searches: u32,
    pub max_searches: u32,
    pub max_followups: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_nodes: limits.max_nodes,
            max_concurrency: limits.max_concurrency,
            max_time_secs: limits.max_time.as_secs(),
            max_depth: limits.max_depth,
            max_spawn_per_decision: limits.max_spawn_per_decision,
            min_searches: limits.min_searches,
            max_searches: limits.max_searches,
            max_followups: limits.max_followups,
        }
    }
}

impl LimitsConfig {
    pub fn to_limits(&self) -> Limits {
        Limits {
            max_nodes: self.max_nodes,
            max_concurrency: self.max_concurrency,
            max_time: Duration::from_secs(self.max_time_secs),
            max_depth: self.max_depth,
            max_spawn_per_decision: self.max_spawn_per_decision,
            min_searches: self.min_searches,
            max_searches: self.max_searches,
            max_followups: self.max_followups,
        }
    }
}

/// Settings shared by every command-backed collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Per-call wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Prompt size budget; droppable sections are removed to fit.
    pub prompt_budget_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CortexBackend {
    Rules,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CortexConfig {
    pub backend: CortexBackend,

    /// Agent command (e.g. `["claude","-p"]`); the prompt is written to stdin.
    pub command: Vec<String>,

    /// Root questions for the rule-based cortex. Empty means "the objective itself".
    pub seeds: Vec<String>,

    /// Rule-based cortex declares done once this many nodes are done.
    pub target_nodes: usize,

    /// Follow-ups the rule-based cortex approves per completed node.
    pub followups_per_node: usize,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            backend: CortexBackend::Rules,
            command: Vec::new(),
            seeds: Vec::new(),
            target_nodes: 6,
            followups_per_node: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalystBackend {
    Heuristic,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalystConfig {
    pub backend: AnalystBackend,
    pub command: Vec<String>,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            backend: AnalystBackend::Heuristic,
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Static,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackend,

    /// Search command; the query is appended as the last argument.
    pub command: Vec<String>,

    /// Canned corpus for the static backend, matched by case-insensitive substring.
    pub entries: Vec<StaticEntryConfig>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Static,
            command: Vec::new(),
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticEntryConfig {
    pub pattern: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl DelveConfig {
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        let positive = [
            ("limits.max_nodes", limits.max_nodes as u64),
            ("limits.max_concurrency", limits.max_concurrency as u64),
            ("limits.max_time_secs", limits.max_time_secs),
            ("limits.max_spawn_per_decision", limits.max_spawn_per_decision as u64),
            ("limits.max_searches", u64::from(limits.max_searches)),
            ("agent.timeout_secs", self.agent.timeout_secs),
            ("agent.output_limit_bytes", self.agent.output_limit_bytes as u64),
            ("agent.prompt_budget_bytes", self.agent.prompt_budget_bytes as u64),
            ("cortex.target_nodes", self.cortex.target_nodes as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if limits.min_searches > limits.max_searches {
            return Err(anyhow!(
                "limits.min_searches ({}) must not exceed limits.max_searches ({})",
                limits.min_searches,
                limits.max_searches
            ));
        }
        if self.cortex.backend == CortexBackend::Command {
            require_command("cortex.command", &self.cortex.command)?;
        }
        if self.analyst.backend == AnalystBackend::Command {
            require_command("analyst.command", &self.analyst.command)?;
        }
        if self.search.backend == SearchBackend::Command {
            require_command("search.command", &self.search.command)?;
        }
        Ok(())
    }
}

fn require_command(name: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DelveConfig::default()`.
pub fn load_config(path: &Path) -> Result<DelveConfig> {
    if !path.exists() {
        let cfg = DelveConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DelveConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DelveConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DelveConfig::default());
        assert_eq!(cfg.limits.to_limits(), Limits::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = DelveConfig::default();
        cfg.search.entries.push(StaticEntryConfig {
            pattern: "rust".to_string(),
            answer: "A systems language.".to_string(),
            sources: vec![Source {
                title: "Rust".to_string(),
                url: Some("https://www.rust-lang.org".to_string()),
            }],
        });
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[limits]\nmax_nodes = 4\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.limits.max_nodes, 4);
        assert_eq!(cfg.limits.max_concurrency, 3);
        assert_eq!(cfg.cortex.backend, CortexBackend::Rules);
    }

    #[test]
    fn validate_rejects_bad_limits_and_missing_commands() {
        let mut cfg = DelveConfig::default();
        cfg.limits.max_concurrency = 0;
        let err = cfg.validate().expect_err("zero concurrency");
        assert!(err.to_string().contains("limits.max_concurrency"));

        let mut cfg = DelveConfig::default();
        cfg.limits.min_searches = 9;
        assert!(cfg.validate().is_err());

        let mut cfg = DelveConfig::default();
        cfg.search.backend = SearchBackend::Command;
        let err = cfg.validate().expect_err("empty command");
        assert!(err.to_string().contains("search.command"));
    }
}
