//! `.delve/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DelveConfig, write_config};

const DELVE_GITIGNORE: &str = "runs/\n";

/// Canonical paths within `.delve/` for a project root.
#[derive(Debug, Clone)]
pub struct DelvePaths {
    pub root: PathBuf,
    pub delve_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub runs_dir: PathBuf,
}

impl DelvePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let delve_dir = root.join(".delve");
        Self {
            root,
            config_path: delve_dir.join("config.toml"),
            gitignore_path: delve_dir.join(".gitignore"),
            runs_dir: delve_dir.join("runs"),
            delve_dir,
        }
    }

    pub fn run(&self, run_id: &str) -> RunPaths {
        RunPaths::new(&self.runs_dir, run_id)
    }
}

/// Artifacts of one run (`.delve/runs/<run-id>/`).
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub state_path: PathBuf,
    pub events_path: PathBuf,
    pub calls_dir: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            state_path: dir.join("state.json"),
            events_path: dir.join("events.jsonl"),
            calls_dir: dir.join("calls"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create run directory {}", self.dir.display()))
    }
}

/// Create `.delve/` with a default config.
///
/// Fails if `.delve/` already exists unless `force` is set.
pub fn init_delve(root: &Path, force: bool) -> Result<DelvePaths> {
    let paths = DelvePaths::new(root);
    if paths.delve_dir.exists() && !paths.delve_dir.is_dir() {
        return Err(anyhow!("delve init: .delve exists but is not a directory"));
    }
    if paths.delve_dir.exists() && !force {
        return Err(anyhow!(
            "delve init: .delve already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;
    fs::write(&paths.gitignore_path, DELVE_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &DelveConfig::default())?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_delve(temp.path(), false).expect("init");

        assert!(paths.delve_dir.is_dir());
        assert!(paths.runs_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            DELVE_GITIGNORE
        );
        assert_eq!(load_config(&paths.config_path).expect("load"), DelveConfig::default());
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_delve(temp.path(), false).expect("init");
        let err = init_delve(temp.path(), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_default_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_delve(temp.path(), false).expect("init");
        fs::write(&paths.config_path, "[limits]\nmax_nodes = 2\n").expect("customize");

        init_delve(temp.path(), true).expect("re-init");
        assert_eq!(load_config(&paths.config_path).expect("load"), DelveConfig::default());
    }

    #[test]
    fn run_paths_are_stable() {
        let paths = DelvePaths::new("/work").run("run-1");
        assert!(paths.state_path.ends_with(".delve/runs/run-1/state.json"));
        assert!(paths.events_path.ends_with(".delve/runs/run-1/events.jsonl"));
        assert!(paths.calls_dir.ends_with(".delve/runs/run-1/calls"));
    }
}
