//! Source health tracking and curation.
//!
//! Each scrape attempt is fed to [`SourceHealthTracker::record_outcome`].
//! A source is disabled once its consecutive failures reach the configured
//! threshold, and the tracker keeps `enabled == (consecutive_failures < threshold)`
//! for every record at all times.
//!
//! Re-enabling follows [`ReenablePolicy`]:
//! - `Manual`: only [`SourceHealthTracker::reenable`] brings a source back.
//!   A success reported for a disabled source counts toward `total_successes`
//!   but leaves the counter and the flag untouched.
//! - `Cooldown { hours }`: once `hours` have passed since the last failure the
//!   source may be retried ([`SourceHealthTracker::should_attempt`]). A
//!   successful retry resets the counter and re-enables it.
//!
//! Every transition is appended to the curation log and kept in memory for
//! the run summary. The ledger is saved after every recorded outcome.

use crate::config::ReenablePolicy;
use crate::error::Result;
use crate::ledger::curation_log::{CurationAction, CurationEntry, CurationLog};
use crate::ledger::{load_json_or_default, write_json_atomic};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealthRecord {
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub total_successes: u64,
    #[serde(default)]
    pub total_failures: u64,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
}

fn enabled_default() -> bool {
    true
}

impl Default for SourceHealthRecord {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            enabled: true,
            last_success: None,
            last_failure: None,
            last_failure_reason: None,
            disabled_at: None,
        }
    }
}

/// Result of one scrape attempt as seen by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    Failure(String),
}

#[derive(Debug)]
pub struct SourceHealthTracker {
    path: PathBuf,
    records: BTreeMap<String, SourceHealthRecord>,
    threshold: u32,
    policy: ReenablePolicy,
    log: CurationLog,
    transitions: Vec<CurationEntry>,
}

impl SourceHealthTracker {
    /// Load the health ledger at `path`. A corrupt file means "no history".
    #[instrument(level = "info", skip_all)]
    pub fn load(
        path: impl AsRef<Path>,
        log: CurationLog,
        threshold: u32,
        policy: ReenablePolicy,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut records: BTreeMap<String, SourceHealthRecord> =
            load_json_or_default(&path, "source health");

        // A changed threshold may flip sources either way; keep the invariant.
        for (source_id, record) in records.iter_mut() {
            let should_be_enabled = record.consecutive_failures < threshold;
            if record.enabled != should_be_enabled {
                warn!(%source_id, consecutive = record.consecutive_failures, threshold,
                    enabled = should_be_enabled, "Health record inconsistent with threshold; corrected");
                record.enabled = should_be_enabled;
            }
        }
        info!(sources = records.len(), threshold, ?policy, "Source health loaded");

        Self {
            path,
            records,
            threshold,
            policy,
            log,
            transitions: Vec::new(),
        }
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.records)
    }

    /// Whether the source is enabled. Unknown sources get a fresh enabled record.
    pub fn is_enabled(&mut self, source_id: &str) -> bool {
        self.records.entry(source_id.to_string()).or_default().enabled
    }

    /// Whether the pipeline should scrape this source now: enabled, or due a
    /// cooldown retry.
    pub fn should_attempt(&mut self, source_id: &str, now: DateTime<Utc>) -> bool {
        let policy = self.policy;
        let record = self.records.entry(source_id.to_string()).or_default();
        if record.enabled {
            return true;
        }
        match policy {
            ReenablePolicy::Manual => false,
            // An unrepresentable cooldown never elapses.
            ReenablePolicy::Cooldown { hours } => record.last_failure.is_none_or(|at| {
                i64::try_from(hours)
                    .ok()
                    .and_then(TimeDelta::try_hours)
                    .and_then(|wait| at.checked_add_signed(wait))
                    .is_some_and(|due| now >= due)
            }),
        }
    }

    pub fn record_outcome(&mut self, source_id: &str, outcome: &Outcome) {
        self.record_outcome_at(source_id, outcome, Utc::now());
    }

    #[instrument(level = "debug", skip(self, outcome))]
    pub fn record_outcome_at(&mut self, source_id: &str, outcome: &Outcome, now: DateTime<Utc>) {
        let threshold = self.threshold;
        let policy = self.policy;
        let record = self.records.entry(source_id.to_string()).or_default();

        let transition = match outcome {
            Outcome::Failure(reason) => {
                let was_enabled = record.enabled;
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                record.total_failures = record.total_failures.saturating_add(1);
                record.last_failure = Some(now);
                record.last_failure_reason = Some(reason.clone());
                warn!(%source_id, consecutive = record.consecutive_failures, %reason, "Source failure recorded");

                if record.consecutive_failures >= threshold {
                    record.enabled = false;
                    if was_enabled {
                        record.disabled_at = Some(now);
                        Some((CurationAction::Disabled, "threshold_exceeded"))
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            Outcome::Success => {
                record.total_successes = record.total_successes.saturating_add(1);
                record.last_success = Some(now);
                if record.enabled {
                    record.consecutive_failures = 0;
                    None
                } else if matches!(policy, ReenablePolicy::Cooldown { .. }) {
                    record.consecutive_failures = 0;
                    record.enabled = true;
                    record.disabled_at = None;
                    Some((CurationAction::Reenabled, "cooldown_retry_succeeded"))
                } else {
                    info!(%source_id, "Success on a manually curated source; it stays disabled");
                    None
                }
            }
        };

        if let Some((action, reason)) = transition {
            self.log_transition(source_id, action, reason, now);
        }
        if let Err(e) = self.save() {
            error!(%source_id, error = %e, "Failed to persist source health");
        }
    }

    /// Manually bring a source back, whatever the policy.
    pub fn reenable(&mut self, source_id: &str) -> Result<bool> {
        let now = Utc::now();
        let record = self.records.entry(source_id.to_string()).or_default();
        let was_disabled = !record.enabled;
        record.consecutive_failures = 0;
        record.enabled = true;
        record.disabled_at = None;
        if was_disabled {
            self.log_transition(source_id, CurationAction::Reenabled, "manual", now);
        }
        self.save()?;
        Ok(was_disabled)
    }

    fn log_transition(
        &mut self,
        source_id: &str,
        action: CurationAction,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let entry = CurationEntry {
            timestamp: now,
            source_id: source_id.to_string(),
            action,
            reason: reason.to_string(),
        };
        info!(%source_id, %action, reason, "Source curated");
        if let Err(e) = self.log.append(&entry) {
            error!(%source_id, path = %self.log.path().display(), error = %e, "Failed to append curation log");
        }
        self.transitions.push(entry);
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> BTreeMap<String, SourceHealthRecord> {
        self.records.clone()
    }

    pub fn record(&self, source_id: &str) -> Option<&SourceHealthRecord> {
        self.records.get(source_id)
    }

    /// Transitions made since this tracker was loaded.
    pub fn transitions(&self) -> &[CurationEntry] {
        &self.transitions
    }

    pub fn disabled_sources(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|(_, r)| !r.enabled)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// One line per source id, in the given order. Sources never seen read as healthy.
    pub fn report<'a>(&self, source_ids: impl IntoIterator<Item = &'a str>) -> String {
        let fresh = SourceHealthRecord::default();
        source_ids
            .into_iter()
            .map(|id| {
                let r = self.records.get(id).unwrap_or(&fresh);
                let status = if r.enabled { "enabled " } else { "DISABLED" };
                let mut line = format!(
                    "{status} {id:<20} failures {}/{} (ok {}, failed {})",
                    r.consecutive_failures, self.threshold, r.total_successes, r.total_failures
                );
                if let Some(reason) = &r.last_failure_reason {
                    line.push_str(&format!(" last error: {reason}"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
