//! Command-line interface.
//!
//! Every option can also come from the environment, so the binary runs the
//! same from a shell, a cron entry or a CI job.

use crate::config::Credentials;
use crate::titles_fix::DEFAULT_MAX_TITLE_LEN;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Turn today's legal news into blog posts and publish them to Sanity.
///
/// # Examples
///
/// ```sh
/// # One pipeline run with credentials from the environment
/// legal_news_autopost
///
/// # Source health report for a custom state directory
/// legal_news_autopost -s /var/lib/autopost health
///
/// # Preview title fixes without touching the CMS
/// legal_news_autopost fix-titles --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to the pipeline config (YAML)
    #[arg(short, long, env = "AUTOPOST_CONFIG")]
    pub config: Option<String>,

    /// Directory holding the ledgers, the curation log and the lock file
    #[arg(short, long, env = "AUTOPOST_STATE_DIR", default_value = "./state")]
    pub state_dir: PathBuf,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "SANITY_PROJECT_ID")]
    pub sanity_project_id: Option<String>,

    #[arg(long, env = "SANITY_TOKEN", hide_env_values = true)]
    pub sanity_token: Option<String>,

    #[arg(long, env = "SANITY_DATASET", default_value = "production")]
    pub sanity_dataset: String,

    /// Author name stamped on every post
    #[arg(long, env = "DEFAULT_AUTHOR", default_value = "Case Value Expert")]
    pub default_author: String,

    /// Generate a featured image for each post
    #[arg(
        long,
        env = "ENABLE_IMAGE_GENERATION",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub enable_image_generation: bool,

    /// AMQP URL for message bus (optional, enables event publishing when `publish` feature is enabled)
    #[arg(long, env = "AMQP_URL")]
    pub amqp_url: Option<String>,

    /// Message bus exchange name (only used when `publish` feature is enabled)
    #[arg(long, env = "MESSAGE_BUS_EXCHANGE", default_value = "events")]
    pub message_bus_exchange: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the pipeline once (default)
    Run,
    /// Print the source health report and curation history
    Health,
    /// Manually re-enable a disabled source
    Reenable {
        /// Source id as listed by `health`
        source_id: String,
    },
    /// Shorten CMS post titles longer than the limit
    FixTitles {
        #[arg(long, default_value_t = DEFAULT_MAX_TITLE_LEN)]
        max_len: usize,
        /// Show the proposed titles without updating the CMS
        #[arg(long)]
        dry_run: bool,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            gemini_api_key: self.gemini_api_key.clone(),
            sanity_project_id: self.sanity_project_id.clone(),
            sanity_token: self.sanity_token.clone(),
            sanity_dataset: self.sanity_dataset.clone(),
            default_author: self.default_author.clone(),
            enable_image_generation: self.enable_image_generation,
        }
    }
}
