//! # Legal News Autopost
//!
//! Turns today's legal news into SEO blog posts and publishes them to a
//! Sanity CMS, once per invocation.
//!
//! ## Features
//!
//! - Scrapes twelve legal and general news sources (or any RSS feed)
//! - Tracks per-source health and curates out sources that keep failing
//! - Never writes about the same topic twice (fingerprint ledger)
//! - Lets the model pick and write the articles, with an evergreen title
//!   queue as fallback
//! - Generates a featured image and publishes the post as Portable Text
//! - Optional run events on a RabbitMQ message bus
//!
//! ## Usage
//!
//! ```sh
//! legal_news_autopost                 # one pipeline run
//! legal_news_autopost health          # source health report
//! legal_news_autopost reenable cnn    # bring a curated-out source back
//! legal_news_autopost fix-titles --dry-run
//! ```
//!
//! ## Architecture
//!
//! One run walks SCRAPING → CURATING → SELECTING → GENERATING → PUBLISHING →
//! RECORDING (see [`pipeline`]). Ledgers live as JSON files in the state
//! directory and are written atomically.

use awful_aj::config::AwfulJadeConfig;
use awful_aj::template::ChatTemplate;
use awful_aj::{config as aj_config, config_dir, template};
use clap::Parser;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod cms;
mod config;
mod content;
mod error;
mod images;
mod ledger;
mod models;
mod pipeline;
mod publish;
mod scrapers;
mod titles_fix;
mod utils;

use cli::{Cli, Command};
use cms::SanityClient;
use config::{Credentials, PipelineConfig};
use content::LlmEditor;
use error::{PipelineError, Result};
use images::ImagenClient;
use ledger::curation_log::CurationLog;
use ledger::{CURATION_LOG_FILE, Ledgers, StateLock};
use pipeline::Pipeline;
use utils::ensure_writable_dir;

#[cfg_attr(not(feature = "publish"), allow(dead_code))]
const SERVICE: &str = "legal_news_autopost";

const SELECTOR_TEMPLATE: &str = "autopost_selector";
const WRITER_TEMPLATE: &str = "autopost_writer";
const EVERGREEN_TEMPLATE: &str = "autopost_evergreen";
const SHORTENER_TEMPLATE: &str = "autopost_title_shortener";

#[tokio::main]
async fn main() -> ExitCode {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    let args = Cli::parse();
    debug!(state_dir = %args.state_dir.display(), command = ?args.command(), "Parsed CLI arguments");

    publish::init(args.amqp_url.as_ref(), &args.message_bus_exchange).await;

    let outcome = match args.command() {
        Command::Run => run(&args).await,
        Command::Health => health(&args),
        Command::Reenable { source_id } => reenable(&args, &source_id),
        Command::FixTitles { max_len, dry_run } => fix_titles(&args, max_len, dry_run).await,
    };

    let elapsed = start_time.elapsed();
    match outcome {
        Ok(()) => {
            info!(?elapsed, "Execution complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(?elapsed, error = %e, "Execution failed");
            publish_error!(
                SERVICE,
                event_kind = "application.failed",
                error = e.to_string(),
                "Application failed"
            );
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Cli) -> Result<PipelineConfig> {
    PipelineConfig::load(args.config.as_deref())
}

/// The awful_aj connection settings and one chat template per prompt kind.
async fn load_llm(names: &[&str]) -> Result<(AwfulJadeConfig, Vec<ChatTemplate>)> {
    let conf_file = config_dir()
        .map_err(|e| PipelineError::Configuration(format!("no awful_aj config dir: {e}")))?
        .join("config.yaml");
    let config_path = conf_file.to_str().ok_or_else(|| {
        PipelineError::Configuration(format!("not a valid config filename: {}", conf_file.display()))
    })?;
    let llm_config = aj_config::load_config(config_path)
        .map_err(|e| PipelineError::Configuration(format!("cannot load {config_path}: {e}")))?;
    info!(config_path, "Loaded LLM configuration");

    let mut templates = Vec::with_capacity(names.len());
    for name in names {
        let t = template::load_template(name)
            .await
            .map_err(|e| PipelineError::Configuration(format!("cannot load template {name}: {e}")))?;
        info!(template = name, "Loaded template");
        templates.push(t);
    }
    Ok((llm_config, templates))
}

fn sanity_client(creds: &Credentials, client: reqwest::Client) -> SanityClient {
    SanityClient::new(
        client,
        creds.sanity_project_id.clone().unwrap_or_default(),
        creds.sanity_dataset.clone(),
        creds.sanity_token.clone().unwrap_or_default(),
        creds.default_author.clone(),
    )
}

async fn run(args: &Cli) -> Result<()> {
    let config = load_config(args)?;
    let creds = args.credentials();
    creds.require_all()?;
    ensure_writable_dir(&args.state_dir).await.map_err(|e| {
        PipelineError::Configuration(format!(
            "state directory {} is not writable: {e}",
            args.state_dir.display()
        ))
    })?;
    let _lock = StateLock::acquire(&args.state_dir)?;

    let client = scrapers::http_client(Duration::from_secs(config.call_timeout_secs))?;
    let fetchers = scrapers::build_scrapers(&config, &client)?;
    info!(sources = fetchers.len(), "Scrapers resolved");

    let (llm_config, templates) =
        load_llm(&[SELECTOR_TEMPLATE, WRITER_TEMPLATE, EVERGREEN_TEMPLATE]).await?;
    let [selector, writer, evergreen] = templates.as_slice() else {
        return Err(PipelineError::Configuration("expected three chat templates".into()));
    };
    let images = if creds.enable_image_generation {
        creds
            .gemini_api_key
            .as_deref()
            .map(|key| ImagenClient::new(client.clone(), key))
    } else {
        info!("Image generation disabled");
        None
    };
    let editor = LlmEditor::new(
        api::retrying(&llm_config, selector),
        api::retrying(&llm_config, writer),
        api::retrying(&llm_config, evergreen),
        images,
    );
    let cms = sanity_client(&creds, client);

    let ledgers = Ledgers::open(&args.state_dir, &config);
    let mut pipeline = Pipeline::new(&config, &fetchers, &editor, &cms, ledgers);
    let result = pipeline.run().await;
    info!(stage = %pipeline.stage(), "Pipeline finished");
    println!("{}", result?);
    Ok(())
}

fn health(args: &Cli) -> Result<()> {
    let config = load_config(args)?;
    let ledgers = Ledgers::open(&args.state_dir, &config);
    println!("{}", ledgers.health.report(config.sources.iter().map(|s| s.id.as_str())));

    let history = CurationLog::new(args.state_dir.join(CURATION_LOG_FILE)).read_all();
    if !history.is_empty() {
        println!("\ncuration history:");
        for entry in history {
            println!(
                "{} {:<20} {:<11} {}",
                entry.timestamp.to_rfc3339(),
                entry.source_id,
                entry.action.to_string(),
                entry.reason
            );
        }
    }
    Ok(())
}

fn reenable(args: &Cli, source_id: &str) -> Result<()> {
    let config = load_config(args)?;
    if !config.sources.iter().any(|s| s.id == source_id) {
        return Err(PipelineError::Configuration(format!(
            "unknown source '{source_id}'"
        )));
    }
    let _lock = StateLock::acquire(&args.state_dir)?;
    let mut ledgers = Ledgers::open(&args.state_dir, &config);
    if ledgers.health.reenable(source_id)? {
        println!("{source_id} re-enabled");
    } else {
        println!("{source_id} was already enabled; failure counter reset");
    }
    Ok(())
}

async fn fix_titles(args: &Cli, max_len: usize, dry_run: bool) -> Result<()> {
    let config = load_config(args)?;
    let creds = args.credentials();
    creds.require_all()?;

    let client = scrapers::http_client(Duration::from_secs(config.call_timeout_secs))?;
    let cms = sanity_client(&creds, client);
    let (llm_config, templates) = load_llm(&[SHORTENER_TEMPLATE]).await?;
    let [shortener] = templates.as_slice() else {
        return Err(PipelineError::Configuration("expected one chat template".into()));
    };
    let asker = api::retrying(&llm_config, shortener);

    let report = titles_fix::fix_titles(&cms, &asker, max_len, dry_run).await?;
    println!("{report}");
    Ok(())
}
