//! Dedup ledger of published topics.
//!
//! Titles and topic summaries are reduced to a fingerprint by
//! [`compute_fingerprint`]: lowercase, every non-alphanumeric character
//! treated as a separator, whitespace collapsed. The normalized string itself
//! is the fingerprint, which keeps the ledger readable.

use crate::error::Result;
use crate::ledger::{load_json_or_default, write_json_atomic};
use crate::models::NewsItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicFingerprint {
    pub fingerprint: String,
    pub published_at: DateTime<Utc>,
    /// Original text, shown to the selector as an already covered topic.
    #[serde(default)]
    pub topic: String,
}

/// Deterministic, case- and punctuation-insensitive fingerprint of `text`.
pub fn compute_fingerprint(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().collect::<String>()
            } else {
                " ".to_string()
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every topic the site has already written about.
///
/// Lookups go through an in-memory set of fingerprints; the ordered list is
/// what gets persisted and what feeds [`DedupLedger::recent_topics`].
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    entries: Vec<TopicFingerprint>,
    index: HashSet<String>,
}

impl DedupLedger {
    #[instrument(level = "info", skip_all)]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries: Vec<TopicFingerprint> = load_json_or_default(&path, "used topics");
        let index = entries.iter().map(|e| e.fingerprint.clone()).collect();
        info!(topics = entries.len(), "Used topics loaded");
        Self {
            path,
            entries,
            index,
        }
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }

    pub fn is_duplicate(&self, text: &str) -> bool {
        let fp = compute_fingerprint(text);
        !fp.is_empty() && self.index.contains(&fp)
    }

    /// Record `text` as used. Returns `false` when it was already recorded or
    /// normalizes to nothing.
    pub fn record(&mut self, text: &str, published_at: DateTime<Utc>) -> bool {
        let fingerprint = compute_fingerprint(text);
        if fingerprint.is_empty() || !self.index.insert(fingerprint.clone()) {
            return false;
        }
        debug!(%fingerprint, "Topic recorded");
        self.entries.push(TopicFingerprint {
            fingerprint,
            published_at,
            topic: text.trim().to_string(),
        });
        true
    }

    /// Drop already covered candidates, keeping the others in their order.
    pub fn filter_candidates(&self, candidates: Vec<NewsItem>) -> Vec<NewsItem> {
        candidates
            .into_iter()
            .filter(|item| {
                let dup = self.is_duplicate(item.topic_text());
                if dup {
                    debug!(title = %item.title, source = %item.source, "Dropping already covered topic");
                }
                !dup
            })
            .collect()
    }

    /// The `limit` most recently recorded topics, oldest first.
    pub fn recent_topics(&self, limit: usize) -> Vec<String> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries[start..]
            .iter()
            .map(|e| {
                if e.topic.is_empty() {
                    e.fingerprint.clone()
                } else {
                    e.topic.clone()
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
