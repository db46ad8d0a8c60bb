//! Pipeline configuration.
//!
//! [`PipelineConfig`] is loaded once from an optional YAML file and passed by
//! reference into the orchestrator, the trackers, and the collaborators. Every
//! field has a default, so an absent file yields the built-in source list and
//! policies. [`Credentials`] come from the command line / environment.

use crate::error::{PipelineError, Result};
use crate::scrapers::ScraperKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, instrument};

/// A configured news origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier used as the health ledger key.
    pub id: String,
    /// Display name attached to scraped items.
    pub name: String,
    pub url: String,
    pub category: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scraper identifier, resolved to a [`ScraperKind`] at startup.
    pub scraper: String,
    /// Keyword filter; empty means "use `fallback_keywords`" for general sources.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SourceConfig {
    fn new(id: &str, name: &str, url: &str, category: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            category: category.to_string(),
            enabled: true,
            scraper: id.to_string(),
            keywords: Vec::new(),
        }
    }

    /// General-news sources carry non-legal stories and need a keyword filter.
    pub fn is_general(&self) -> bool {
        self.category == "general_legal"
    }
}

/// Longest cooldown accepted from the config file: one year.
pub const MAX_COOLDOWN_HOURS: u64 = 24 * 366;

/// How a source disabled by repeated failures comes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReenablePolicy {
    /// Only `reenable <source>` brings the source back.
    #[default]
    Manual,
    /// After `hours` since the last failure one probe attempt is allowed.
    Cooldown { hours: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: Vec<SourceConfig>,
    /// Consecutive failures after which a source is disabled.
    pub disable_threshold: u32,
    pub reenable_policy: ReenablePolicy,
    /// Timeout applied to every scraper, AI, and CMS call.
    pub call_timeout_secs: u64,
    /// News articles to generate per run.
    pub articles_per_run: usize,
    /// Evergreen titles to consume per run.
    pub titles_per_run: usize,
    /// Process evergreen titles every run, not only when no news qualifies.
    pub evergreen_always: bool,
    /// Drop candidates whose known publication date is not today.
    pub today_only: bool,
    pub max_candidates_per_source: usize,
    /// Pause between two source fetches.
    pub request_delay_ms: u64,
    /// How many of the most recent used topics the selector is shown.
    pub used_topics_prompt_limit: usize,
    pub fallback_keywords: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            disable_threshold: 3,
            reenable_policy: ReenablePolicy::Manual,
            call_timeout_secs: 60,
            articles_per_run: 2,
            titles_per_run: 1,
            evergreen_always: true,
            today_only: true,
            max_candidates_per_source: 5,
            request_delay_ms: 1000,
            used_topics_prompt_limit: 100,
            fallback_keywords: [
                "lawsuit",
                "settlement",
                "verdict",
                "jury",
                "court",
                "sued",
                "sues",
                "injury",
                "injured",
                "recall",
                "discrimination",
                "harassment",
                "wrongful",
                "negligence",
                "liability",
                "class action",
                "crash",
                "accident",
                "osha",
                "eeoc",
                "attorney",
                "judge",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// The legal news sources the pipeline ships with.
pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("aboutlawsuits", "AboutLawsuits", "https://www.aboutlawsuits.com", "mass_torts"),
        SourceConfig::new(
            "fda",
            "FDA Recalls",
            "https://www.fda.gov/safety/recalls-market-withdrawals-safety-alerts",
            "mass_torts",
        ),
        SourceConfig::new("eeoc", "EEOC News", "https://www.eeoc.gov/newsroom", "employment_law"),
        SourceConfig::new("osha", "OSHA News", "https://www.osha.gov/news/newsreleases", "personal_injury"),
        SourceConfig::new("courthousenews", "Courthouse News", "https://www.courthousenews.com", "general_legal"),
        SourceConfig::new("consumersafety", "ConsumerSafety", "https://www.consumersafety.org/news/", "mass_torts"),
        SourceConfig::new(
            "bloomberg",
            "Bloomberg Law Daily Labor",
            "https://news.bloomberglaw.com/daily-labor-report",
            "employment_law",
        ),
        SourceConfig::new("apnews", "AP News", "https://apnews.com/", "general_legal"),
        SourceConfig::new("cnn", "CNN US", "https://www.cnn.com/us", "general_legal"),
        SourceConfig::new("nytimes", "NY Times US", "https://www.nytimes.com/section/us", "general_legal"),
        SourceConfig::new("propublica", "ProPublica", "https://www.propublica.org/", "general_legal"),
        SourceConfig::new("onscenetv", "OnScene TV", "https://onscene.tv/", "personal_injury"),
    ]
}

impl PipelineConfig {
    /// Load from a YAML file, or the built-in defaults when `path` is `None`.
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(Path::new(p)).map_err(|e| {
                    PipelineError::Configuration(format!("cannot read config {p}: {e}"))
                })?;
                let parsed: PipelineConfig = serde_yaml::from_str(&raw)?;
                info!(path = p, sources = parsed.sources.len(), "Loaded pipeline config");
                parsed
            }
            None => {
                info!("No config file given; using built-in defaults");
                PipelineConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would only fail later, at call time.
    pub fn validate(&self) -> Result<()> {
        if self.disable_threshold == 0 {
            return Err(PipelineError::Configuration(
                "disable_threshold must be at least 1".into(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "call_timeout_secs must be at least 1".into(),
            ));
        }
        if let ReenablePolicy::Cooldown { hours } = self.reenable_policy {
            if hours > MAX_COOLDOWN_HOURS {
                return Err(PipelineError::Configuration(format!(
                    "cooldown of {hours}h exceeds the {MAX_COOLDOWN_HOURS}h maximum"
                )));
            }
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(PipelineError::Configuration(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            if source.url.trim().is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "source '{}' has no url",
                    source.id
                )));
            }
            ScraperKind::from_id(&source.scraper)?;
        }
        Ok(())
    }

    /// Keywords a source's items must match, or empty for no filtering.
    pub fn keywords_for<'a>(&'a self, source: &'a SourceConfig) -> &'a [String] {
        if !source.keywords.is_empty() {
            &source.keywords
        } else if source.is_general() {
            &self.fallback_keywords
        } else {
            &[]
        }
    }
}

/// Secrets and CMS identity needed before any work begins.
#[derive(Clone, Default)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub sanity_project_id: Option<String>,
    pub sanity_token: Option<String>,
    pub sanity_dataset: String,
    pub default_author: String,
    pub enable_image_generation: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("sanity_project_id", &self.sanity_project_id)
            .field("sanity_token", &self.sanity_token.as_ref().map(|_| "<redacted>"))
            .field("sanity_dataset", &self.sanity_dataset)
            .field("default_author", &self.default_author)
            .field("enable_image_generation", &self.enable_image_generation)
            .finish()
    }
}

impl Credentials {
    /// Fail with every missing variable named at once.
    pub fn require_all(&self) -> Result<()> {
        let mut missing = Vec::new();
        if is_blank(&self.gemini_api_key) {
            missing.push("GEMINI_API_KEY");
        }
        if is_blank(&self.sanity_project_id) {
            missing.push("SANITY_PROJECT_ID");
        }
        if is_blank(&self.sanity_token) {
            missing.push("SANITY_TOKEN");
        }
        if self.sanity_dataset.trim().is_empty() {
            missing.push("SANITY_DATASET");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(format!(
                "missing required credentials: {}",
                missing.join(", ")
            )))
        }
    }
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map(str::trim).unwrap_or("").is_empty()
}
