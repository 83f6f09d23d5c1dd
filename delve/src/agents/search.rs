//! Search provider seam used by node workers.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::io::config::StaticEntryConfig;
use crate::state::Source;

/// Result of one search: synthesized text plus the sources behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl SearchResult {
    /// No text and no sources: the query found nothing.
    pub fn is_empty(&self) -> bool {
        self.answer.trim().is_empty() && self.sources.is_empty()
    }
}

/// Stateless query-to-evidence backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResult>;
}

/// Canned corpus matched by case-insensitive substring.
///
/// The first entry whose pattern occurs in the query wins. Queries that match
/// nothing return an empty result.
#[derive(Debug, Clone, Default)]
pub struct StaticSearch {
    entries: Vec<StaticEntryConfig>,
}

impl StaticSearch {
    pub fn new(entries: Vec<StaticEntryConfig>) -> Self {
        Self { entries }
    }

    fn lookup(&self, query: &str) -> Option<&StaticEntryConfig> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .find(|entry| query.contains(&entry.pattern.to_lowercase()))
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        Ok(self
            .lookup(query)
            .map(|entry| SearchResult {
                answer: entry.answer.clone(),
                sources: entry.sources.clone(),
            })
            .unwrap_or_default())
    }
}
