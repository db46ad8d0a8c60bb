//! Error taxonomy for the pipeline.
//!
//! Every collaborator call returns a [`PipelineError`]. The orchestrator
//! decides per variant whether the error is isolated (recorded as a source
//! failure or a skipped article) or aborts the run; only
//! [`PipelineError::Configuration`] is fatal.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network or site availability problem while scraping.
    #[error("fetch error: {0}")]
    TransientFetch(String),

    /// The site answered but its markup no longer yields articles.
    #[error("parse error: {0}")]
    Parse(String),

    /// Selection, generation, or image generation failed.
    #[error("AI service error: {0}")]
    AiService(String),

    /// The CMS rejected or failed to store a post.
    #[error("publish error (status {status}): {message}")]
    Publish { status: u16, message: String },

    /// Missing or rejected credentials, invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A collaborator call exceeded the configured per-call timeout.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// True only for errors that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::TransientFetch(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::Configuration(format!("invalid YAML config: {err}"))
    }
}
