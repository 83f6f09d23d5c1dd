//! JSON-lines event log (`runs/<id>/events.jsonl`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::events::ResearchEvent;

/// Appends each event as one JSON line and mirrors it to tracing.
pub struct EventLog {
    path: PathBuf,
    file: File,
}

impl EventLog {
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("open event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub async fn append(&mut self, event: &ResearchEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("append event to {}", self.path.display()))
    }

    /// Consume events until the sink side closes. Returns the number written.
    pub async fn drain(mut self, mut rx: UnboundedReceiver<ResearchEvent>) -> Result<usize> {
        let mut written = 0;
        while let Some(event) = rx.recv().await {
            trace_event(&event);
            self.append(&event).await?;
            written += 1;
        }
        self.file
            .flush()
            .await
            .with_context(|| format!("flush event log {}", self.path.display()))?;
        Ok(written)
    }
}

fn trace_event(event: &ResearchEvent) {
    match event {
        ResearchEvent::NodeStarted {
            node_id, question, ..
        } => info!(node = %node_id, question = %question, "node started"),
        ResearchEvent::SearchCompleted {
            node_id,
            query,
            source_count,
        } => debug!(node = %node_id, query = %query, source_count, "search completed"),
        ResearchEvent::NodeDone {
            node_id,
            outcome,
            confidence,
        } => info!(node = %node_id, ?outcome, %confidence, "node done"),
        ResearchEvent::DecisionMade {
            seq,
            decision,
            spawned,
            rejected,
            ..
        } => info!(seq, ?decision, spawned = spawned.len(), rejected, "decision made"),
        ResearchEvent::ResearchComplete { stop_reason, .. } => {
            info!(?stop_reason, "research complete");
        }
        ResearchEvent::ResearchStopped { .. } => info!("research stopped"),
    }
}
