//! News source scrapers.
//!
//! Every configured source names a scraper identifier. Identifiers are
//! resolved once at startup by [`ScraperKind::from_id`]; an unknown identifier
//! is a configuration error, never a call-time surprise.
//!
//! # Supported Sources
//!
//! | Identifier | Site | Method |
//! |------------|------|--------|
//! | `aboutlawsuits` | AboutLawsuits | HTML headlines |
//! | `fda` | FDA recalls table | HTML rows |
//! | `eeoc` | EEOC newsroom | HTML rows |
//! | `osha` | OSHA news releases | HTML headlines |
//! | `courthousenews` | Courthouse News | HTML articles |
//! | `consumersafety` | ConsumerSafety | HTML headlines |
//! | `bloomberg` | Bloomberg Law Daily Labor | HTML headlines |
//! | `apnews` | AP News | HTML headlines |
//! | `cnn` | CNN US | HTML headlines |
//! | `nytimes` | NY Times US | HTML headlines |
//! | `propublica` | ProPublica | HTML headlines |
//! | `onscenetv` | OnScene TV | HTML headlines |
//! | `rss` | any RSS 2.0 feed | [`rss`] |
//!
//! A fetch that yields no items at all counts as a parse failure: the site
//! answered, but its markup no longer matches the profile.

pub mod html;
pub mod rss;
pub mod sites;

use crate::config::{PipelineConfig, SourceConfig};
use crate::error::{PipelineError, Result};
use crate::models::NewsItem;
use chrono::NaiveDate;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SUMMARY_MAX_CHARS: usize = 200;

/// Anything that can turn a configured source into candidate articles.
pub trait Fetch {
    /// Scrape one source.
    ///
    /// # Arguments
    ///
    /// * `source` - The configured source, including its listing URL
    ///
    /// # Returns
    ///
    /// The candidates, deduplicated and capped. A transport error, a non-2xx
    /// status or an empty listing is an `Err` and counts as a failure.
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<NewsItem>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScraperKind {
    AboutLawsuits,
    Fda,
    Eeoc,
    Osha,
    CourthouseNews,
    ConsumerSafety,
    Bloomberg,
    ApNews,
    Cnn,
    NyTimes,
    ProPublica,
    OnSceneTv,
    Rss,
}

impl ScraperKind {
    pub fn from_id(id: &str) -> Result<Self> {
        let kind = match id.trim().to_ascii_lowercase().as_str() {
            "aboutlawsuits" => ScraperKind::AboutLawsuits,
            "fda" => ScraperKind::Fda,
            "eeoc" => ScraperKind::Eeoc,
            "osha" => ScraperKind::Osha,
            "courthousenews" => ScraperKind::CourthouseNews,
            "consumersafety" => ScraperKind::ConsumerSafety,
            "bloomberg" => ScraperKind::Bloomberg,
            "apnews" => ScraperKind::ApNews,
            "cnn" => ScraperKind::Cnn,
            "nytimes" => ScraperKind::NyTimes,
            "propublica" => ScraperKind::ProPublica,
            "onscenetv" => ScraperKind::OnSceneTv,
            "rss" => ScraperKind::Rss,
            other => {
                return Err(PipelineError::Configuration(format!(
                    "unknown scraper '{other}'"
                )));
            }
        };
        Ok(kind)
    }
}

/// An item as read off a page, before URL resolution and filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: String,
    pub href: String,
    pub summary: String,
    pub published_at: Option<NaiveDate>,
}

/// A resolved scraper for one source.
#[derive(Debug, Clone)]
pub struct Scraper {
    kind: ScraperKind,
    client: reqwest::Client,
    keywords: Vec<String>,
    limit: usize,
}

impl Scraper {
    pub fn kind(&self) -> ScraperKind {
        self.kind
    }
}

impl Fetch for Scraper {
    #[instrument(level = "info", skip_all, fields(source = %source.id, url = %source.url))]
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<NewsItem>> {
        let resp = self.client.get(&source.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::TransientFetch(format!("HTTP {status}")));
        }
        let body = resp.text().await?;
        let base = Url::parse(&source.url)
            .map_err(|e| PipelineError::Configuration(format!("bad url for {}: {e}", source.id)))?;

        let raw = match self.kind {
            ScraperKind::Rss => rss::parse_feed(&body)?,
            kind => html::parse_listing(&body, &sites::profile(kind)),
        };
        debug!(raw = raw.len(), "Parsed listing");
        if raw.is_empty() {
            return Err(PipelineError::Parse(format!(
                "no items found at {}",
                source.url
            )));
        }

        let items = finalize(raw, source, &base, &self.keywords, self.limit, min_title_len(self.kind));
        info!(count = items.len(), "Scraped source");
        Ok(items)
    }
}

fn min_title_len(kind: ScraperKind) -> usize {
    match kind {
        ScraperKind::Rss => 1,
        kind => sites::profile(kind).min_title_len,
    }
}

/// Shared HTTP client for all scrapers.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Configuration(format!("cannot build HTTP client: {e}")))
}

/// Resolve every configured source to its scraper, keyed by source id.
pub fn build_scrapers(
    config: &PipelineConfig,
    client: &reqwest::Client,
) -> Result<BTreeMap<String, Scraper>> {
    config
        .sources
        .iter()
        .map(|source| {
            let kind = ScraperKind::from_id(&source.scraper)?;
            let scraper = Scraper {
                kind,
                client: client.clone(),
                keywords: config.keywords_for(source).to_vec(),
                limit: config.max_candidates_per_source,
            };
            debug!(source = %source.id, kind = ?scraper.kind(), "Resolved scraper");
            Ok((source.id.clone(), scraper))
        })
        .collect()
}

/// Resolve links, drop short or duplicate entries, apply the keyword filter,
/// and cap the result at `limit`.
pub fn finalize(
    raw: Vec<RawItem>,
    source: &SourceConfig,
    base: &Url,
    keywords: &[String],
    limit: usize,
    min_title_len: usize,
) -> Vec<NewsItem> {
    raw.into_iter()
        .filter_map(|r| {
            let title = collapse_ws(&r.title);
            if title.chars().count() < min_title_len || r.href.trim().is_empty() {
                return None;
            }
            let url = base.join(r.href.trim()).ok()?;
            if !matches!(url.scheme(), "http" | "https") {
                return None;
            }
            let url = url.to_string();
            let published_at = r.published_at.or_else(|| date_from_url(&url));
            Some(NewsItem {
                title,
                summary: collapse_ws(&r.summary).chars().take(SUMMARY_MAX_CHARS).collect(),
                url,
                source: source.name.clone(),
                source_id: source.id.clone(),
                category: source.category.clone(),
                published_at,
                topic_summary: None,
            })
        })
        .unique_by(|item| item.url.clone())
        .filter(|item| matches_keywords(item, keywords))
        .take(limit)
        .collect()
}

/// True when `keywords` is empty or any keyword occurs in title or summary.
pub fn matches_keywords(item: &NewsItem, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", item.title, item.summary).to_lowercase();
    keywords
        .iter()
        .any(|k| haystack.contains(&k.to_lowercase()))
}

static URL_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(20\d{2})[/-](\d{1,2})[/-](\d{1,2})(?:/|-|$)").unwrap());

/// Publication date encoded in a `/YYYY/MM/DD/` or `/YYYY-MM-DD` URL segment.
pub fn date_from_url(url: &str) -> Option<NaiveDate> {
    let caps = URL_DATE.captures(url)?;
    let y = caps[1].parse().ok()?;
    let m = caps[2].parse().ok()?;
    let d = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
