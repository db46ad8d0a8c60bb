//! LLM calls with exponential backoff.
//!
//! Every prompt the pipeline sends (topic selection, article writing,
//! evergreen writing, title shortening) goes through an [`AskAsync`]
//! implementation. Production code wraps [`AskFnWrapper`], a thin adapter
//! over `awful_aj::api::ask`, in [`RetryAsk`]; tests substitute canned
//! responders.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! The orchestrator still bounds each collaborator call with its own timeout,
//! so a long backoff chain ends as a timeout rather than a hung run.

use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use rand::{Rng, rng};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Retry attempts after the first failure.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Send text to a model and get its reply.
///
/// Implemented by the awful_aj adapter, by the retry decorator wrapping it,
/// and by the canned responders in tests.
pub trait AskAsync {
    /// The reply type, `String` for every production asker.
    type Response;

    /// Send one prompt payload.
    ///
    /// # Arguments
    ///
    /// * `text` - The user message, usually a JSON payload for the template
    ///
    /// # Returns
    ///
    /// The model's reply, or the backend error when the call failed.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Decorator adding exponential backoff with jitter to any [`AskAsync`].
///
/// Only the final error is returned; each failed attempt before it is logged
/// at `warn` with the delay chosen.
pub struct RetryAsk<T> {
    /// The asker being retried.
    inner: T,
    /// Retries after the first failure; `0` means a single attempt.
    max_retries: usize,
    /// Delay before the first retry, doubled on each later one.
    base_delay: StdDuration,
    /// Cap on the doubled delay, before jitter.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Wrap `inner` with a 30 second delay cap.
    ///
    /// # Arguments
    ///
    /// * `inner` - The asker to retry
    /// * `max_retries` - Retries after the first failure ([`DEFAULT_MAX_RETRIES`] in production)
    /// * `base_delay` - Delay before the first retry
    ///
    /// # Example
    ///
    /// ```ignore
    /// let asker = AskFnWrapper { config: &llm_config, template: &writer };
    /// let asker = RetryAsk::new(asker, DEFAULT_MAX_RETRIES, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    /// Replace the default 30 second cap on a single backoff delay.
    pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = self.backoff(attempt) + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// `awful_aj::api::ask` bound to one config and one chat template.
///
/// No retry of its own; wrap it in [`RetryAsk`] (see [`retrying`]).
#[derive(Debug)]
pub struct AskFnWrapper<'a> {
    /// Endpoint, key and model settings from the awful_aj config file.
    pub config: &'a AwfulJadeConfig,
    /// System prompt and message layout for one prompt kind.
    pub template: &'a ChatTemplate,
}

impl<'a> AskAsync for AskFnWrapper<'a> {
    type Response = String;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = ask(self.config, text.to_string(), self.template, None, None).await;
        if let Err(e) = &res {
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %e, "API call failed");
        }
        res
    }
}

/// Production asker for one template: the awful_aj call behind retry.
///
/// # Arguments
///
/// * `config` - The loaded awful_aj configuration
/// * `template` - The chat template for this prompt kind
///
/// # Returns
///
/// A [`RetryAsk`] with [`DEFAULT_MAX_RETRIES`] retries and a one second
/// base delay.
///
/// # Example
///
/// ```ignore
/// let selector = api::retrying(&llm_config, &selector_template);
/// let reply = selector.ask(&payload).await?;
/// ```
pub fn retrying<'a>(
    config: &'a AwfulJadeConfig,
    template: &'a ChatTemplate,
) -> RetryAsk<AskFnWrapper<'a>> {
    RetryAsk::new(
        AskFnWrapper { config, template },
        DEFAULT_MAX_RETRIES,
        StdDuration::from_secs(1),
    )
}
