//! Research state load/save with schema + invariant validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::scheduler::StateObserver;
use crate::state::ResearchState;

const STATE_SCHEMA: &str = include_str!("../../schemas/research_state.schema.json");

static STATE_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(STATE_SCHEMA).map_err(|err| err.to_string())?;
    validator_for(&schema).map_err(|err| err.to_string())
});

/// Parse and validate a serialized state (schema, then types, then invariants).
pub fn parse_state(contents: &str) -> Result<ResearchState> {
    let value: Value = serde_json::from_str(contents).context("parse state json")?;
    validate_schema(&value)?;
    let state: ResearchState = serde_json::from_value(value).context("deserialize state")?;
    let errors = validate_invariants(&state, None);
    if !errors.is_empty() {
        return Err(anyhow!("state invariants failed: {}", errors.join("; ")));
    }
    Ok(state)
}

/// Load and validate a state file.
pub fn load_state(path: &Path) -> Result<ResearchState> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    parse_state(&contents).with_context(|| format!("load state {}", path.display()))
}

/// Atomically write the state as pretty JSON.
pub fn write_state(path: &Path, state: &ResearchState) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

fn validate_schema(value: &Value) -> Result<()> {
    let validator = STATE_VALIDATOR
        .as_ref()
        .map_err(|err| anyhow!("invalid state schema: {err}"))?;
    if !validator.is_valid(value) {
        let messages = validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!("state schema validation failed: {}", messages.join("; ")));
    }
    Ok(())
}

/// Persists every state change to `path`.
#[derive(Debug, Clone)]
pub struct StateWriter {
    path: PathBuf,
}

impl StateWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateObserver for StateWriter {
    fn state_changed(&mut self, state: &ResearchState) -> Result<()> {
        debug!(path = %self.path.display(), nodes = state.nodes.len(), "writing state");
        write_state(&self.path, state)
    }
}
