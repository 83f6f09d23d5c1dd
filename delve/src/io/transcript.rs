//! Per-call transcripts for command-backed collaborators (`runs/<id>/calls/`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};

/// Files written for one agent call.
#[derive(Debug, Clone)]
pub struct CallPaths {
    pub prompt_path: PathBuf,
    pub output_path: PathBuf,
}

impl CallPaths {
    pub fn new(dir: &Path, seq: u32, label: &str) -> Self {
        let stem = format!("{seq:04}-{label}");
        Self {
            prompt_path: dir.join(format!("{stem}.prompt.md")),
            output_path: dir.join(format!("{stem}.output.txt")),
        }
    }
}

/// Numbers calls across every collaborator of one run.
#[derive(Debug)]
pub struct Transcript {
    dir: PathBuf,
    next_seq: AtomicU32,
}

impl Transcript {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_seq: AtomicU32::new(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the prompt and raw output of one call.
    pub fn record(&self, label: &str, prompt: &str, output: &str) -> Result<CallPaths> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let paths = CallPaths::new(&self.dir, seq, &sanitize(label));
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create calls dir {}", self.dir.display()))?;
        write_text(&paths.prompt_path, prompt)?;
        write_text(&paths.output_path, output)?;
        Ok(paths)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
