//! Append-only curation log.
//!
//! One JSON object per line. Each entry is written with a single `write_all`
//! on a file opened in append mode, so a crash can at worst tear the last line.
//! The next append starts on a fresh line, so only the torn fragment is lost.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurationAction {
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "re-enabled")]
    Reenabled,
}

impl std::fmt::Display for CurationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurationAction::Disabled => f.write_str("disabled"),
            CurationAction::Reenabled => f.write_str("re-enabled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurationEntry {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub action: CurationAction,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CurationLog {
    path: PathBuf,
}

impl CurationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &CurationEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if f.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            f.seek(SeekFrom::End(-1))?;
            f.read_exact(&mut last)?;
            if last[0] != b'\n' {
                warn!(path = %self.path.display(), "Curation log ends in a torn line");
                line.insert(0, '\n');
            }
        }
        f.write_all(line.as_bytes())?;
        Ok(())
    }

    /// All parseable entries, oldest first. Malformed lines are skipped.
    pub fn read_all(&self) -> Vec<CurationEntry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed curation log line");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, action: CurationAction) -> CurationEntry {
        CurationEntry {
            timestamp: Utc::now(),
            source_id: source.to_string(),
            action,
            reason: "threshold_exceeded".to_string(),
        }
    }

    #[test]
    fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = CurationLog::new(dir.path().join("curation.log"));
        log.append(&entry("cnn", CurationAction::Disabled)).unwrap();
        log.append(&entry("cnn", CurationAction::Reenabled)).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().next().unwrap().contains("\"action\":\"disabled\""));
        assert!(raw.contains("\"action\":\"re-enabled\""));

        let entries = log.read_all();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, CurationAction::Reenabled);
    }

    #[test]
    fn torn_last_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = CurationLog::new(dir.path().join("curation.log"));
        log.append(&entry("fda", CurationAction::Disabled)).unwrap();
        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(b"{\"timestamp\":\"20").unwrap();

        assert_eq!(log.read_all().len(), 1);
    }

    #[test]
    fn append_after_torn_line_starts_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = CurationLog::new(dir.path().join("curation.log"));
        log.append(&entry("fda", CurationAction::Disabled)).unwrap();
        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(b"{\"timestamp\":\"20").unwrap();
        drop(f);

        log.append(&entry("fda", CurationAction::Reenabled)).unwrap();
        let entries = log.read_all();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, CurationAction::Reenabled);
        assert!(fs::read_to_string(log.path()).unwrap().ends_with("}\n"));
    }
}
