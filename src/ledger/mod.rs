//! JSON-backed ledgers owned by one pipeline run.
//!
//! | File | Module | Contents |
//! |------|--------|----------|
//! | `source_health.json` | [`health`] | per-source failure counters and enabled flag |
//! | `used_topics.json` | [`topics`] | fingerprints of published topics |
//! | `titles.json` | [`titles`] | evergreen title queue |
//! | `curation.log` | [`curation_log`] | JSON lines, one per enable/disable transition |
//!
//! Every JSON ledger is written with [`write_json_atomic`]: the document is
//! written to a sibling `.tmp` file, flushed, then renamed over the target, so
//! an interrupted run leaves either the old or the new file, never a torn one.
//! A missing or unreadable ledger loads as empty with a warning.
//!
//! Concurrent invocations against one state directory are not supported;
//! [`StateLock`] turns a second one into a configuration error, and takes over
//! a lock left by a run that was killed.

pub mod curation_log;
pub mod health;
pub mod titles;
pub mod topics;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use curation_log::CurationLog;
use health::SourceHealthTracker;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use titles::TitleQueue;
use topics::DedupLedger;
use tracing::{debug, error, warn};

pub const HEALTH_FILE: &str = "source_health.json";
pub const TOPICS_FILE: &str = "used_topics.json";
pub const TITLES_FILE: &str = "titles.json";
pub const CURATION_LOG_FILE: &str = "curation.log";
pub const LOCK_FILE: &str = "autopost.lock";

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = json.len(), "Ledger written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a ledger, treating a missing or corrupt file as "no history".
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), what, "Ledger not found; starting empty");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), what, error = %e, "Ledger unreadable; starting empty");
            return T::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), what, error = %e, "Ledger corrupt; starting empty");
            T::default()
        }
    }
}

/// The three ledgers of one state directory, opened together.
#[derive(Debug)]
pub struct Ledgers {
    pub health: SourceHealthTracker,
    pub topics: DedupLedger,
    pub titles: TitleQueue,
}

impl Ledgers {
    pub fn open(state_dir: &Path, config: &PipelineConfig) -> Self {
        let log = CurationLog::new(state_dir.join(CURATION_LOG_FILE));
        Self {
            health: SourceHealthTracker::load(
                state_dir.join(HEALTH_FILE),
                log,
                config.disable_threshold,
                config.reenable_policy,
            ),
            topics: DedupLedger::load(state_dir.join(TOPICS_FILE)),
            titles: TitleQueue::load(state_dir.join(TITLES_FILE)),
        }
    }

    /// Save every ledger, returning how many saves failed.
    pub fn save_all(&self) -> usize {
        [
            ("source health", self.health.save()),
            ("used topics", self.topics.save()),
            ("titles", self.titles.save()),
        ]
        .into_iter()
        .filter_map(|(what, res)| res.err().map(|e| (what, e)))
        .inspect(|(what, e)| error!(what, error = %e, "Failed to persist ledger"))
        .count()
    }
}

/// Advisory lock held for the lifetime of one invocation.
///
/// The lock file holds the owner's PID. A run killed before `Drop` leaves the
/// file behind; the next [`StateLock::acquire`] finds the PID dead and takes
/// the lock over instead of refusing to start.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

#[derive(Debug, PartialEq)]
enum LockState {
    HeldBy(u32),
    Stale,
}

impl StateLock {
    /// Create `autopost.lock` in `state_dir`.
    ///
    /// # Returns
    ///
    /// The guard, or [`PipelineError::Configuration`] while a live process
    /// holds the lock. A lock whose PID is dead or unreadable is removed and
    /// acquired once more.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);
        match Self::try_create(&path)? {
            Some(lock) => Ok(lock),
            None => match lock_state(&path) {
                LockState::HeldBy(pid) => Err(PipelineError::Configuration(format!(
                    "another run (pid {pid}) holds {}",
                    path.display()
                ))),
                LockState::Stale => {
                    warn!(path = %path.display(), "Removing stale state lock");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    Self::try_create(&path)?.ok_or_else(|| {
                        PipelineError::Configuration(format!(
                            "another run took {} while the stale lock was removed",
                            path.display()
                        ))
                    })
                }
            },
        }
    }

    fn try_create(path: &Path) -> Result<Option<Self>> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn lock_state(path: &Path) -> LockState {
    let pid = fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok());
    match pid {
        Some(pid) if is_process_running(pid) => LockState::HeldBy(pid),
        _ => LockState::Stale,
    }
}

#[cfg(target_os = "linux")]
fn is_process_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_process_running(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release state lock");
        }
    }
}
