//! One pipeline invocation.
//!
//! ```text
//! IDLE → SCRAPING → CURATING → SELECTING → GENERATING → PUBLISHING → RECORDING → DONE
//!                                                                      any ─→ FAILED
//! ```
//!
//! Every collaborator call is bounded by the configured timeout. Source and
//! article failures are logged and counted, never propagated; only a
//! [`PipelineError::Configuration`] ends the run in `FAILED`. Posts already
//! published stay published whatever happens later in the run.

use crate::cms::Publish;
use crate::config::{PipelineConfig, SourceConfig};
use crate::content::{SelectArticles, WriteArticles};
use crate::error::{PipelineError, Result};
use crate::ledger::Ledgers;
use crate::ledger::curation_log::CurationAction;
use crate::ledger::health::Outcome;
use crate::models::{Draft, ExistingPost, NewsItem, link_database};
use crate::scrapers::Fetch;
use crate::{publish_error, publish_info};
use chrono::{Local, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

#[cfg_attr(not(feature = "publish"), allow(dead_code))]
const SERVICE: &str = "legal_news_autopost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Scraping,
    Curating,
    Selecting,
    Generating,
    Publishing,
    Recording,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "IDLE",
            Stage::Scraping => "SCRAPING",
            Stage::Curating => "CURATING",
            Stage::Selecting => "SELECTING",
            Stage::Generating => "GENERATING",
            Stage::Publishing => "PUBLISHING",
            Stage::Recording => "RECORDING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    /// Disabled sources not attempted this run.
    pub sources_skipped: usize,
    /// All sources disabled after this run.
    pub sources_disabled: Vec<String>,
    pub sources_newly_disabled: Vec<String>,
    pub articles_scraped: usize,
    pub articles_fresh: usize,
    pub articles_deduplicated: usize,
    pub articles_selected: usize,
    pub articles_published: usize,
    pub articles_skipped: usize,
    pub evergreen_published: usize,
    pub post_ids: Vec<String>,
    pub persistence_errors: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "sources: {} attempted, {} ok, {} failed, {} skipped (disabled)",
            self.sources_attempted, self.sources_succeeded, self.sources_failed, self.sources_skipped
        )?;
        if !self.sources_disabled.is_empty() {
            writeln!(f, "disabled sources: {}", self.sources_disabled.join(", "))?;
        }
        if !self.sources_newly_disabled.is_empty() {
            writeln!(f, "disabled this run: {}", self.sources_newly_disabled.join(", "))?;
        }
        writeln!(
            f,
            "articles: {} scraped, {} fresh, {} duplicates dropped, {} selected, {} published, {} skipped",
            self.articles_scraped,
            self.articles_fresh,
            self.articles_deduplicated,
            self.articles_selected,
            self.articles_published,
            self.articles_skipped
        )?;
        write!(f, "evergreen published: {}", self.evergreen_published)?;
        if self.persistence_errors > 0 {
            write!(f, "\npersistence errors: {}", self.persistence_errors)?;
        }
        Ok(())
    }
}

/// Items with a known publication date must be from `today`; undated items pass.
pub fn is_fresh(item: &NewsItem, today: NaiveDate) -> bool {
    item.published_at.is_none_or(|d| d == today)
}

async fn bounded<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(PipelineError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// One run over borrowed collaborators and owned ledgers.
///
/// Generic over the scraper, editor and CMS seams so tests can drive the
/// whole state machine with in-memory fakes.
pub struct Pipeline<'a, F, E, P> {
    config: &'a PipelineConfig,
    fetchers: &'a BTreeMap<String, F>,
    editor: &'a E,
    publisher: &'a P,
    ledgers: Ledgers,
    call_timeout: Duration,
    request_delay: Duration,
    today: NaiveDate,
    stage: Stage,
    summary: RunSummary,
}

impl<'a, F, E, P> Pipeline<'a, F, E, P>
where
    F: Fetch,
    E: SelectArticles + WriteArticles,
    P: Publish,
{
    /// # Arguments
    ///
    /// * `config` - Validated pipeline settings; `call_timeout_secs` bounds every call
    /// * `fetchers` - One scraper per source id
    /// * `editor` - Selection and article writing
    /// * `publisher` - The CMS
    /// * `ledgers` - Opened on the run's state directory; saved as the run goes
    ///
    /// # Example
    ///
    /// ```ignore
    /// let ledgers = Ledgers::open(&state_dir, &config);
    /// let mut pipeline = Pipeline::new(&config, &fetchers, &editor, &cms, ledgers);
    /// let summary = pipeline.run().await?;
    /// println!("{summary}");
    /// ```
    pub fn new(
        config: &'a PipelineConfig,
        fetchers: &'a BTreeMap<String, F>,
        editor: &'a E,
        publisher: &'a P,
        ledgers: Ledgers,
    ) -> Self {
        Self {
            config,
            fetchers,
            editor,
            publisher,
            ledgers,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            request_delay: Duration::from_millis(config.request_delay_ms),
            today: Local::now().date_naive(),
            stage: Stage::Idle,
            summary: RunSummary::default(),
        }
    }

    #[cfg(test)]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    #[cfg(test)]
    pub fn with_call_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = limit;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[cfg(test)]
    pub fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    #[cfg(test)]
    pub fn into_ledgers(self) -> Ledgers {
        self.ledgers
    }

    fn enter(&mut self, stage: Stage) {
        if self.stage != stage {
            debug!(from = %self.stage, to = %stage, "Stage transition");
            self.stage = stage;
        }
    }

    /// Run every stage once.
    ///
    /// # Returns
    ///
    /// The run summary once the run reaches `DONE`. `Err` means it ended in
    /// `FAILED`; only a configuration error (including rejected CMS
    /// credentials) gets there. Ledgers are saved either way.
    #[instrument(level = "info", skip_all, fields(today = %self.today))]
    pub async fn run(&mut self) -> Result<RunSummary> {
        publish_info!(
            SERVICE,
            event_kind = "run.started",
            sources = self.config.sources.len(),
            "Pipeline run started"
        );
        match self.run_stages().await {
            Ok(()) => {
                self.enter(Stage::Done);
                info!(
                    published = self.summary.articles_published,
                    evergreen = self.summary.evergreen_published,
                    skipped = self.summary.articles_skipped,
                    "Run complete"
                );
                publish_info!(
                    SERVICE,
                    event_kind = "run.completed",
                    published = self.summary.articles_published,
                    evergreen = self.summary.evergreen_published,
                    skipped = self.summary.articles_skipped,
                    "Pipeline run completed"
                );
                Ok(self.summary.clone())
            }
            Err(e) => {
                let failed_in = self.stage;
                self.enter(Stage::Failed);
                error!(stage = %failed_in, error = %e, "Run failed");
                self.summary.persistence_errors += self.ledgers.save_all();
                publish_error!(
                    SERVICE,
                    event_kind = "run.failed",
                    stage = failed_in.to_string(),
                    error = e.to_string(),
                    "Pipeline run failed"
                );
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<()> {
        let pool = self.scrape().await?;
        self.curate();
        let (candidates, selected) = self.select(pool).await?;

        let evergreen_possible =
            self.config.titles_per_run > 0 && self.ledgers.titles.pending_count() > 0;
        if selected.is_empty() && !evergreen_possible {
            info!("Nothing to write this run");
            self.enter(Stage::Recording);
            self.summary.persistence_errors += self.ledgers.save_all();
            return Ok(());
        }

        let posts = self.existing_posts().await?;
        let link_db = link_database(&posts);

        for item in &selected {
            self.process_news_item(item, &candidates, &link_db).await?;
        }

        if self.config.evergreen_always || self.summary.articles_published == 0 {
            self.process_evergreen(&link_db).await?;
        }

        self.enter(Stage::Recording);
        self.summary.persistence_errors += self.ledgers.save_all();
        Ok(())
    }

    async fn scrape(&mut self) -> Result<Vec<NewsItem>> {
        self.enter(Stage::Scraping);
        let config = self.config;
        let now = Utc::now();
        let mut pool = Vec::new();

        for source in config.sources.iter().filter(|s| s.enabled) {
            if !self.ledgers.health.should_attempt(&source.id, now) {
                info!(source = %source.id, "Source disabled; skipping");
                self.summary.sources_skipped += 1;
                continue;
            }
            let fetcher = self.fetcher_for(source)?;
            if self.summary.sources_attempted > 0 && !self.request_delay.is_zero() {
                sleep(self.request_delay).await;
            }
            self.summary.sources_attempted += 1;

            match bounded("fetch", self.call_timeout, fetcher.fetch(source)).await {
                Ok(items) => {
                    info!(source = %source.id, count = items.len(), "Source scraped");
                    self.ledgers.health.record_outcome(&source.id, &Outcome::Success);
                    self.summary.sources_succeeded += 1;
                    self.summary.articles_scraped += items.len();
                    pool.extend(items);
                }
                Err(e) => {
                    warn!(source = %source.id, error = %e, "Source failed");
                    self.ledgers
                        .health
                        .record_outcome(&source.id, &Outcome::Failure(e.to_string()));
                    self.summary.sources_failed += 1;
                }
            }
        }

        publish_info!(
            SERVICE,
            event_kind = "scraping.completed",
            attempted = self.summary.sources_attempted,
            failed = self.summary.sources_failed,
            articles = pool.len(),
            "Scraping completed"
        );
        Ok(pool)
    }

    fn fetcher_for(&self, source: &SourceConfig) -> Result<&'a F> {
        let fetchers: &'a BTreeMap<String, F> = self.fetchers;
        fetchers.get(&source.id).ok_or_else(|| {
            PipelineError::Configuration(format!("no scraper resolved for source '{}'", source.id))
        })
    }

    fn curate(&mut self) {
        self.enter(Stage::Curating);
        if let Err(e) = self.ledgers.health.save() {
            error!(error = %e, "Failed to persist source health");
            self.summary.persistence_errors += 1;
        }
        self.summary.sources_disabled = self
            .ledgers
            .health
            .disabled_sources()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.summary.sources_newly_disabled = self
            .ledgers
            .health
            .transitions()
            .iter()
            .filter(|t| t.action == CurationAction::Disabled)
            .map(|t| t.source_id.clone())
            .collect();
        if !self.summary.sources_newly_disabled.is_empty() {
            warn!(sources = ?self.summary.sources_newly_disabled, "Sources disabled this run");
        }
    }

    /// Freshness and dedup first, then the AI pick. Returns the filtered
    /// candidate pool and the selection.
    async fn select(&mut self, pool: Vec<NewsItem>) -> Result<(Vec<NewsItem>, Vec<NewsItem>)> {
        self.enter(Stage::Selecting);
        let today = self.today;
        let fresh: Vec<NewsItem> = if self.config.today_only {
            pool.into_iter().filter(|i| is_fresh(i, today)).collect()
        } else {
            pool
        };
        self.summary.articles_fresh = fresh.len();

        let before = fresh.len();
        let candidates = self.ledgers.topics.filter_candidates(fresh);
        self.summary.articles_deduplicated = before - candidates.len();
        info!(
            fresh = before,
            candidates = candidates.len(),
            "Candidates after freshness and dedup"
        );
        if candidates.is_empty() || self.config.articles_per_run == 0 {
            return Ok((candidates, Vec::new()));
        }

        let editor = self.editor;
        let existing = self
            .ledgers
            .topics
            .recent_topics(self.config.used_topics_prompt_limit);
        let picked = match bounded(
            "select",
            self.call_timeout,
            editor.select(&candidates, &existing, self.config.articles_per_run, today),
        )
        .await
        {
            Ok(picked) => picked,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Selection failed; falling back to evergreen titles");
                Vec::new()
            }
        };

        // The selector's topic summary may name a story already covered.
        let topics = &self.ledgers.topics;
        let (selected, covered): (Vec<_>, Vec<_>) = picked.into_iter().partition(|item| {
            item.topic_summary
                .as_deref()
                .is_none_or(|s| !topics.is_duplicate(s))
        });
        for item in &covered {
            info!(title = %item.title, "Selected topic already covered; dropping");
        }
        self.summary.articles_deduplicated += covered.len();
        self.summary.articles_selected = selected.len();

        publish_info!(
            SERVICE,
            event_kind = "selection.completed",
            candidates = candidates.len(),
            selected = selected.len(),
            "Selection completed"
        );
        Ok((candidates, selected))
    }

    async fn existing_posts(&mut self) -> Result<Vec<ExistingPost>> {
        let publisher = self.publisher;
        match bounded("existing posts", self.call_timeout, publisher.existing_posts()).await {
            Ok(posts) => Ok(posts),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "Could not load existing posts; writing without internal links");
                Ok(Vec::new())
            }
        }
    }

    /// Generate then publish one draft. `Ok(None)` means the article was skipped.
    async fn generate_and_publish(
        &mut self,
        label: &str,
        generate: impl Future<Output = Result<Draft>>,
    ) -> Result<Option<(String, Draft)>> {
        self.enter(Stage::Generating);
        let draft = match bounded("generate", self.call_timeout, generate).await {
            Ok(draft) => draft,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(article = %label, error = %e, "Generation failed; skipping article");
                self.skip(label, &e);
                return Ok(None);
            }
        };

        self.enter(Stage::Publishing);
        let publisher = self.publisher;
        match bounded("publish", self.call_timeout, publisher.publish(&draft)).await {
            Ok(post_id) => {
                info!(article = %label, %post_id, "Published");
                publish_info!(
                    SERVICE,
                    event_kind = "post.published",
                    post_id = post_id,
                    title = draft.article.title,
                    "Post published"
                );
                self.summary.post_ids.push(post_id.clone());
                Ok(Some((post_id, draft)))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(article = %label, error = %e, "Publish failed; skipping article");
                self.skip(label, &e);
                Ok(None)
            }
        }
    }

    fn skip(&mut self, label: &str, e: &PipelineError) {
        self.summary.articles_skipped += 1;
        debug!(article = %label, error = %e, skipped = self.summary.articles_skipped, "Article skipped");
        publish_error!(
            SERVICE,
            event_kind = "post.failed",
            article = label,
            error = e.to_string(),
            "Post failed"
        );
    }

    async fn process_news_item(
        &mut self,
        item: &NewsItem,
        pool: &[NewsItem],
        link_db: &str,
    ) -> Result<()> {
        let editor = self.editor;
        let published = self
            .generate_and_publish(&item.title, editor.generate(item, pool, link_db))
            .await?;
        let Some((_, draft)) = published else {
            return Ok(());
        };

        self.enter(Stage::Recording);
        let now = Utc::now();
        let topics = &mut self.ledgers.topics;
        topics.record(item.topic_text(), now);
        if let Some(summary) = &item.topic_summary {
            topics.record(summary, now);
        }
        topics.record(&draft.article.title, now);
        if let Err(e) = topics.save() {
            error!(error = %e, "Failed to persist used topics");
            self.summary.persistence_errors += 1;
        }
        self.summary.articles_published += 1;
        Ok(())
    }

    /// Write up to `titles_per_run` evergreen posts from the queue head.
    ///
    /// A queued title that is already in the dedup ledger is marked consumed
    /// without using a slot, so the next pending title takes its place. A
    /// failed generation or publish uses its slot and stays queued.
    async fn process_evergreen(&mut self, link_db: &str) -> Result<()> {
        let budget = self.config.titles_per_run;
        let pending = self.ledgers.titles.next_pending(self.ledgers.titles.pending_count());
        if pending.is_empty() {
            info!("Title queue is empty");
            return Ok(());
        }
        let mut attempted = 0;
        for (position, title) in pending {
            if attempted == budget {
                break;
            }
            if self.ledgers.topics.is_duplicate(&title) {
                // Published by an earlier run that stopped before marking it.
                info!(%title, "Queued title already published; marking consumed");
                self.consume_title(position);
                continue;
            }
            attempted += 1;

            let editor = self.editor;
            let published = self
                .generate_and_publish(&title, editor.generate_from_title(&title, link_db))
                .await?;
            if published.is_none() {
                continue;
            }

            self.enter(Stage::Recording);
            self.consume_title(position);
            self.ledgers.topics.record(&title, Utc::now());
            if let Err(e) = self.ledgers.topics.save() {
                error!(error = %e, "Failed to persist used topics");
                self.summary.persistence_errors += 1;
            }
            self.summary.evergreen_published += 1;
        }
        if attempted < budget {
            info!(attempted, budget, "Title queue exhausted");
        }
        Ok(())
    }

    fn consume_title(&mut self, position: usize) {
        self.ledgers.titles.mark_consumed(position, Utc::now());
        if let Err(e) = self.ledgers.titles.save() {
            error!(error = %e, "Failed to persist title queue");
            self.summary.persistence_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReenablePolicy;
    use crate::ledger::titles::TitleQueue;
    use crate::ledger::topics::DedupLedger;
    use crate::ledger::{HEALTH_FILE, TITLES_FILE, TOPICS_FILE, write_json_atomic};
    use crate::models::GeneratedArticle;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn news(source: &str, title: &str) -> NewsItem {
        NewsItem {
            title: title.to_string(),
            url: format!("https://{source}.example.com/{}", title.replace(' ', "-")),
            summary: String::new(),
            source: source.to_uppercase(),
            source_id: source.to_string(),
            category: "mass_torts".into(),
            published_at: None,
            topic_summary: None,
        }
    }

    #[derive(Debug, Default)]
    struct FakeSource {
        items: Vec<NewsItem>,
        fail: bool,
        delay: Option<Duration>,
        calls: Cell<usize>,
    }

    impl FakeSource {
        fn ok(items: Vec<NewsItem>) -> Self {
            Self { items, ..Default::default() }
        }

        fn failing() -> Self {
            Self { fail: true, ..Default::default() }
        }
    }

    impl Fetch for FakeSource {
        async fn fetch(&self, _source: &SourceConfig) -> Result<Vec<NewsItem>> {
            self.calls.set(self.calls.get() + 1);
            if let Some(d) = self.delay {
                sleep(d).await;
            }
            if self.fail {
                Err(PipelineError::TransientFetch("connection reset".into()))
            } else {
                Ok(self.items.clone())
            }
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    enum Selection {
        #[default]
        FirstN,
        Nothing,
        Fail,
        Hang,
    }

    #[derive(Debug, Default)]
    struct FakeEditor {
        seen: RefCell<Vec<Vec<String>>>,
        selection: Selection,
        fail_titles: Vec<String>,
        slow_titles: Vec<String>,
    }

    fn draft_for(title: &str) -> Draft {
        Draft {
            article: GeneratedArticle {
                title: format!("Blog: {title}"),
                slug: "x".into(),
                body_markdown: "## A\n\nB".into(),
                ..Default::default()
            },
            image: None,
        }
    }

    impl SelectArticles for FakeEditor {
        async fn select(
            &self,
            candidates: &[NewsItem],
            _existing_topics: &[String],
            count: usize,
            _today: NaiveDate,
        ) -> Result<Vec<NewsItem>> {
            self.seen
                .borrow_mut()
                .push(candidates.iter().map(|c| c.title.clone()).collect());
            match self.selection {
                Selection::FirstN => {}
                Selection::Nothing => return Ok(Vec::new()),
                Selection::Fail => return Err(PipelineError::AiService("quota exceeded".into())),
                Selection::Hang => {
                    sleep(Duration::from_secs(5)).await;
                    return Ok(Vec::new());
                }
            }
            Ok(candidates
                .iter()
                .take(count)
                .cloned()
                .map(|mut c| {
                    c.topic_summary = Some(format!("story about {}", c.title));
                    c
                })
                .collect())
        }
    }

    impl WriteArticles for FakeEditor {
        async fn generate(&self, item: &NewsItem, _pool: &[NewsItem], _link_db: &str) -> Result<Draft> {
            if self.fail_titles.contains(&item.title) {
                return Err(PipelineError::AiService("model overloaded".into()));
            }
            if self.slow_titles.contains(&item.title) {
                sleep(Duration::from_secs(5)).await;
            }
            Ok(draft_for(&item.title))
        }

        async fn generate_from_title(&self, title: &str, _link_db: &str) -> Result<Draft> {
            Ok(draft_for(title))
        }
    }

    #[derive(Debug, Default)]
    struct FakeCms {
        published: RefCell<Vec<String>>,
        reject_auth: bool,
    }

    impl Publish for FakeCms {
        async fn existing_posts(&self) -> Result<Vec<ExistingPost>> {
            Ok(Vec::new())
        }

        async fn publish(&self, draft: &Draft) -> Result<String> {
            if self.reject_auth {
                return Err(PipelineError::Configuration("CMS rejected credentials (HTTP 401)".into()));
            }
            let mut published = self.published.borrow_mut();
            published.push(draft.article.title.clone());
            Ok(format!("post-{}", published.len()))
        }
    }

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            url: format!("https://{id}.example.com"),
            category: "mass_torts".into(),
            enabled: true,
            scraper: "rss".into(),
            keywords: Vec::new(),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            sources: vec![source("x"), source("y"), source("z")],
            disable_threshold: 3,
            reenable_policy: ReenablePolicy::Manual,
            articles_per_run: 2,
            titles_per_run: 1,
            evergreen_always: false,
            request_delay_ms: 0,
            ..PipelineConfig::default()
        }
    }

    fn fetchers(x: FakeSource) -> BTreeMap<String, FakeSource> {
        BTreeMap::from([
            ("x".to_string(), x),
            (
                "y".to_string(),
                FakeSource::ok(vec![news("y", "Y one lawsuit"), news("y", "Y two verdict")]),
            ),
            ("z".to_string(), FakeSource::ok(vec![news("z", "Z one recall")])),
        ])
    }

    async fn run_once(
        dir: &Path,
        config: &PipelineConfig,
        fetchers: &BTreeMap<String, FakeSource>,
        editor: &FakeEditor,
        cms: &FakeCms,
    ) -> (Result<RunSummary>, Stage, Ledgers) {
        let limit = Duration::from_secs(config.call_timeout_secs);
        run_with_timeout(dir, config, fetchers, editor, cms, limit).await
    }

    async fn run_with_timeout(
        dir: &Path,
        config: &PipelineConfig,
        fetchers: &BTreeMap<String, FakeSource>,
        editor: &FakeEditor,
        cms: &FakeCms,
        limit: Duration,
    ) -> (Result<RunSummary>, Stage, Ledgers) {
        let ledgers = Ledgers::open(dir, config);
        let mut pipeline = Pipeline::new(config, fetchers, editor, cms, ledgers)
            .with_today(today())
            .with_call_timeout(limit);
        let res = pipeline.run().await;
        let stage = pipeline.stage();
        (res, stage, pipeline.into_ledgers())
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fetchers = fetchers(FakeSource::failing());
        let editor = FakeEditor::default();
        let cms = FakeCms::default();

        let (res, stage, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        let summary = res.unwrap();
        assert_eq!(stage, Stage::Done);
        assert_eq!(summary.sources_attempted, 3);
        assert_eq!(summary.sources_failed, 1);
        assert_eq!(summary.articles_scraped, 3);
        assert_eq!(
            editor.seen.borrow()[0],
            vec!["Y one lawsuit", "Y two verdict", "Z one recall"]
        );
        assert_eq!(ledgers.health.record("x").unwrap().consecutive_failures, 1);
        assert_eq!(summary.articles_published, 2);
    }

    #[tokio::test]
    async fn source_disabled_after_threshold_is_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fetchers = fetchers(FakeSource::failing());
        let editor = FakeEditor::default();
        let cms = FakeCms::default();

        for run in 1..=3 {
            let (res, _, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
            let summary = res.unwrap();
            assert_eq!(summary.sources_attempted, 3, "run {run}");
            if run == 3 {
                assert_eq!(summary.sources_newly_disabled, vec!["x"]);
            }
            assert_eq!(ledgers.health.record("x").is_some_and(|r| r.enabled), run < 3);
        }
        assert_eq!(fetchers["x"].calls.get(), 3);

        let (res, _, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        let summary = res.unwrap();
        assert_eq!(fetchers["x"].calls.get(), 3);
        assert_eq!(summary.sources_skipped, 1);
        assert_eq!(summary.sources_attempted, 2);
        assert_eq!(summary.sources_disabled, vec!["x"]);
        assert!(!ledgers.health.record("x").is_some_and(|r| r.enabled));
        assert_eq!(fetchers["y"].calls.get(), 4);
        assert_eq!(fetchers["z"].calls.get(), 4);

        // Run 1 published two items and run 2 the third; later runs see only
        // already-covered topics.
        let seen = editor.seen.borrow();
        assert_eq!(seen[0].len(), 3);
        assert_eq!(seen[1], vec!["Z one recall"]);
        assert_eq!(seen.len(), 2);
        assert_eq!(cms.published.borrow().len(), 3);

        let log = std::fs::read_to_string(dir.path().join(crate::ledger::CURATION_LOG_FILE)).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("threshold_exceeded"));
    }

    #[tokio::test]
    async fn recorded_topics_never_reach_the_selector() {
        let dir = tempfile::tempdir().unwrap();
        let mut topics = DedupLedger::load(dir.path().join(TOPICS_FILE));
        topics.record("Y two verdict", Utc::now());
        topics.save().unwrap();

        let config = config();
        let fetchers = fetchers(FakeSource::ok(vec![news("x", "X first")]));
        let editor = FakeEditor::default();
        let cms = FakeCms::default();
        let (res, _, _) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        let summary = res.unwrap();
        assert_eq!(editor.seen.borrow()[0], vec!["X first", "Y one lawsuit", "Z one recall"]);
        assert_eq!(summary.articles_deduplicated, 1);
    }

    #[tokio::test]
    async fn stale_items_are_dropped_undated_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let mut stale = news("x", "X old story");
        stale.published_at = NaiveDate::from_ymd_opt(2026, 10, 17);
        let mut current = news("x", "X todays story");
        current.published_at = Some(today());
        let fetchers = fetchers(FakeSource::ok(vec![stale, current]));
        let editor = FakeEditor::default();
        let cms = FakeCms::default();
        let (res, _, _) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        assert_eq!(res.unwrap().articles_fresh, 4);
        assert!(!editor.seen.borrow()[0].contains(&"X old story".to_string()));
    }

    #[tokio::test]
    async fn one_failed_article_does_not_block_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fetchers = fetchers(FakeSource::failing());
        let editor = FakeEditor {
            fail_titles: vec!["Y one lawsuit".into()],
            ..Default::default()
        };
        let cms = FakeCms::default();
        let (res, stage, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        let summary = res.unwrap();
        assert_eq!(stage, Stage::Done);
        assert_eq!(summary.articles_selected, 2);
        assert_eq!(summary.articles_skipped, 1);
        assert_eq!(summary.articles_published, 1);
        assert_eq!(*cms.published.borrow(), vec!["Blog: Y two verdict"]);
        assert!(!ledgers.topics.is_duplicate("Y one lawsuit"));
        assert!(ledgers.topics.is_duplicate("Y two verdict"));
        assert!(ledgers.topics.is_duplicate("story about Y two verdict"));
    }

    #[tokio::test]
    async fn rejected_credentials_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fetchers = fetchers(FakeSource::failing());
        let editor = FakeEditor::default();
        let cms = FakeCms {
            reject_auth: true,
            ..Default::default()
        };
        let (res, stage, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        assert!(res.unwrap_err().is_fatal());
        assert_eq!(stage, Stage::Failed);
        assert!(ledgers.topics.is_empty());
        // Health gathered before the failure is kept.
        let reloaded = Ledgers::open(dir.path(), &config);
        assert_eq!(reloaded.health.record("x").unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn slow_source_times_out_as_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fetchers = fetchers(FakeSource {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let editor = FakeEditor::default();
        let cms = FakeCms::default();
        let ledgers = Ledgers::open(dir.path(), &config);
        let mut pipeline = Pipeline::new(&config, &fetchers, &editor, &cms, ledgers)
            .with_today(today())
            .with_call_timeout(Duration::from_millis(50));
        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.sources_failed, 1);
        let record = pipeline.ledgers().health.record("x").unwrap();
        assert!(record.last_failure_reason.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn evergreen_fallback_consumes_queue_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(
            &dir.path().join(TITLES_FILE),
            &serde_json::json!({"titles": ["Dog Bite Claims Guide", "Slip and Fall Basics"]}),
        )
        .unwrap();

        let mut config = config();
        config.sources = vec![source("x")];
        let fetchers = BTreeMap::from([("x".to_string(), FakeSource::failing())]);
        let editor = FakeEditor::default();
        let cms = FakeCms::default();

        let (res, _, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        let summary = res.unwrap();
        assert_eq!(summary.evergreen_published, 1);
        assert_eq!(*cms.published.borrow(), vec!["Blog: Dog Bite Claims Guide"]);
        assert!(ledgers.titles.entries()[0].consumed);
        assert!(!ledgers.titles.entries()[1].consumed);

        let titles = TitleQueue::load(dir.path().join(TITLES_FILE));
        assert_eq!(titles.pending_count(), 1);
        assert_eq!(titles.next_pending(1)[0].1, "Slip and Fall Basics");
    }

    #[tokio::test]
    async fn evergreen_skipped_when_news_published_unless_always() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(
            &dir.path().join(TITLES_FILE),
            &serde_json::json!([{"title": "Dog Bite Claims Guide", "consumed": false}]),
        )
        .unwrap();
        let mut config = config();
        let fetchers = fetchers(FakeSource::failing());
        let editor = FakeEditor::default();
        let cms = FakeCms::default();

        let (res, _, _) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        assert_eq!(res.unwrap().evergreen_published, 0);

        config.evergreen_always = true;
        let (res, _, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        assert_eq!(res.unwrap().evergreen_published, 1);
        assert_eq!(ledgers.titles.pending_count(), 0);
    }

    fn queue_titles(dir: &Path, titles: &[&str]) {
        write_json_atomic(&dir.join(TITLES_FILE), &serde_json::json!({ "titles": titles })).unwrap();
    }

    #[tokio::test]
    async fn unusable_selection_falls_back_to_evergreen() {
        for selection in [Selection::Nothing, Selection::Fail, Selection::Hang] {
            let dir = tempfile::tempdir().unwrap();
            queue_titles(dir.path(), &["Dog Bite Claims Guide"]);
            let config = config();
            let fetchers = fetchers(FakeSource::failing());
            let editor = FakeEditor {
                selection,
                ..Default::default()
            };
            let cms = FakeCms::default();

            let (res, stage, ledgers) = run_with_timeout(
                dir.path(),
                &config,
                &fetchers,
                &editor,
                &cms,
                Duration::from_millis(50),
            )
            .await;
            let summary = res.unwrap();
            assert_eq!(stage, Stage::Done, "{selection:?}");
            // Fresh candidates existed and reached the selector.
            assert_eq!(editor.seen.borrow()[0].len(), 3, "{selection:?}");
            assert_eq!(summary.articles_selected, 0, "{selection:?}");
            assert_eq!(summary.articles_published, 0, "{selection:?}");
            assert_eq!(summary.evergreen_published, 1, "{selection:?}");
            assert_eq!(*cms.published.borrow(), vec!["Blog: Dog Bite Claims Guide"]);
            assert_eq!(ledgers.titles.pending_count(), 0, "{selection:?}");
            assert!(ledgers.titles.entries()[0].consumed_at.is_some());
        }
    }

    #[tokio::test]
    async fn slow_generation_skips_only_that_article() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fetchers = fetchers(FakeSource::failing());
        let editor = FakeEditor {
            slow_titles: vec!["Y one lawsuit".into()],
            ..Default::default()
        };
        let cms = FakeCms::default();

        let (res, stage, ledgers) = run_with_timeout(
            dir.path(),
            &config,
            &fetchers,
            &editor,
            &cms,
            Duration::from_millis(50),
        )
        .await;
        let summary = res.unwrap();
        assert_eq!(stage, Stage::Done);
        assert_eq!(summary.articles_selected, 2);
        assert_eq!(summary.articles_skipped, 1);
        assert_eq!(summary.articles_published, 1);
        assert_eq!(*cms.published.borrow(), vec!["Blog: Y two verdict"]);
        assert!(!ledgers.topics.is_duplicate("Y one lawsuit"));
    }

    #[tokio::test]
    async fn already_published_title_does_not_use_an_evergreen_slot() {
        let dir = tempfile::tempdir().unwrap();
        queue_titles(dir.path(), &["Dog Bite Claims Guide", "Slip and Fall Basics"]);
        let mut topics = DedupLedger::load(dir.path().join(TOPICS_FILE));
        topics.record("Dog Bite Claims Guide", Utc::now());
        topics.save().unwrap();

        let mut config = config();
        config.sources = vec![source("x")];
        let fetchers = BTreeMap::from([("x".to_string(), FakeSource::failing())]);
        let editor = FakeEditor::default();
        let cms = FakeCms::default();

        let (res, _, ledgers) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        let summary = res.unwrap();
        assert_eq!(summary.evergreen_published, 1);
        assert_eq!(*cms.published.borrow(), vec!["Blog: Slip and Fall Basics"]);
        assert_eq!(ledgers.titles.pending_count(), 0);
    }

    #[tokio::test]
    async fn ledgers_reload_cleanly_after_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fetchers = fetchers(FakeSource::failing());
        let editor = FakeEditor::default();
        let cms = FakeCms::default();
        let (res, _, before) = run_once(dir.path(), &config, &fetchers, &editor, &cms).await;
        res.unwrap();

        for name in [HEALTH_FILE, TOPICS_FILE] {
            let raw = std::fs::read_to_string(dir.path().join(name)).unwrap();
            serde_json::from_str::<serde_json::Value>(&raw).unwrap();
            assert!(!dir.path().join(format!("{name}.tmp")).exists());
        }
        let after = Ledgers::open(dir.path(), &config);
        assert_eq!(after.health.snapshot(), before.health.snapshot());
        assert_eq!(after.topics.len(), before.topics.len());
    }

    #[test]
    fn freshness_rules() {
        let mut item = news("x", "X story");
        assert!(is_fresh(&item, today()));
        item.published_at = Some(today());
        assert!(is_fresh(&item, today()));
        item.published_at = NaiveDate::from_ymd_opt(2026, 10, 17);
        assert!(!is_fresh(&item, today()));
    }

    #[test]
    fn summary_display_mentions_disabled_sources() {
        let summary = RunSummary {
            sources_disabled: vec!["cnn".into()],
            articles_published: 2,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.contains("disabled sources: cnn"));
        assert!(text.contains("2 published"));
    }
}
