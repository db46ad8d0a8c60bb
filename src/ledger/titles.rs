//! Evergreen title queue.
//!
//! Titles are curated by hand in `titles.json`. They are consumed in file
//! order and marked `consumed` instead of being removed. The legacy
//! `{"titles": [...]}` layout is still read and migrated on the next save.

use crate::error::Result;
use crate::ledger::{load_json_or_default, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleQueueEntry {
    pub title: String,
    #[serde(default)]
    pub consumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TitlesFile {
    Entries(Vec<TitleQueueEntry>),
    Legacy { titles: Vec<String> },
}

impl Default for TitlesFile {
    fn default() -> Self {
        TitlesFile::Entries(Vec::new())
    }
}

#[derive(Debug)]
pub struct TitleQueue {
    path: PathBuf,
    entries: Vec<TitleQueueEntry>,
}

impl TitleQueue {
    /// Load the queue, migrating the legacy `{"titles": [...]}` layout.
    ///
    /// # Arguments
    ///
    /// * `path` - The `titles.json` file; missing or corrupt loads as empty
    #[instrument(level = "info", skip_all)]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match load_json_or_default::<TitlesFile>(&path, "title queue") {
            TitlesFile::Entries(entries) => entries,
            TitlesFile::Legacy { titles } => {
                warn!(count = titles.len(), "Legacy titles.json layout; will migrate on save");
                titles
                    .into_iter()
                    .map(|title| TitleQueueEntry {
                        title,
                        consumed: false,
                        consumed_at: None,
                    })
                    .collect()
            }
        };
        let queue = Self { path, entries };
        info!(total = queue.entries.len(), pending = queue.pending_count(), "Title queue loaded");
        queue
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }

    /// Up to `n` pending titles in queue order, with their positions.
    pub fn next_pending(&self, n: usize) -> Vec<(usize, String)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.consumed)
            .take(n)
            .map(|(i, e)| (i, e.title.clone()))
            .collect()
    }

    /// Mark the entry at `position` consumed. Returns `false` if it already was
    /// or does not exist.
    pub fn mark_consumed(&mut self, position: usize, at: DateTime<Utc>) -> bool {
        match self.entries.get_mut(position) {
            Some(entry) if !entry.consumed => {
                entry.consumed = true;
                entry.consumed_at = Some(at);
                true
            }
            _ => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.consumed).count()
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[TitleQueueEntry] {
        &self.entries
    }
}
