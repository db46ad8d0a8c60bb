//! Run events on a message bus, behind the `publish` cargo feature.
//!
//! With the feature enabled, events go to RabbitMQ through `awful_publish`.
//! Without it, [`init`] returns `false` and the [`publish_info!`] and
//! [`publish_error!`] macros expand to nothing, so call sites need no `#[cfg]`.
//!
//! Events are sent with `awful_publish::publish()` directly, never through the
//! tracing subscriber, so they do not interfere with log output.
//!
//! # Events Published
//!
//! | Event Kind | Description |
//! |------------|-------------|
//! | `run.started` | Pipeline run started, with the configured source count |
//! | `scraping.completed` | Sources attempted and failed, candidate count |
//! | `selection.completed` | Candidates after dedup and the number selected |
//! | `post.published` | One post created in the CMS, with its document id |
//! | `post.failed` | One article skipped after a generation or publish error |
//! | `run.completed` | Run reached DONE, with published/evergreen/skipped counts |
//! | `run.failed` | Run ended in FAILED, with the stage it failed in |
//! | `application.failed` | A subcommand failed before or outside a run |
//!
//! # Usage
//!
//! ```ignore
//! publish::init(Some(&"amqp://localhost:5672".to_string()), "events").await;
//!
//! publish_info!(
//!     "legal_news_autopost",
//!     event_kind = "post.published",
//!     post_id = "abc123",
//!     "Post published"
//! );
//! ```
//!
//! # Feature Flag
//!
//! Enable with: `cargo build --features publish`
//!
//! Requires access to the private `awful_publish` repository.

/// Connect to the AMQP broker at `amqp_url` and start the background
/// publisher. Returns whether events will be sent; a failed connection is
/// logged and the run goes on without events.
#[cfg(feature = "publish")]
pub async fn init(amqp_url: Option<&String>, exchange: &str) -> bool {
    use awful_publish::BusConfig;
    use tracing::{info, warn};

    let Some(url) = amqp_url else {
        return false;
    };
    match awful_publish::init_global(BusConfig::new(url.clone(), exchange.to_string())).await {
        Ok(_) => {
            info!(%exchange, "Message bus initialized");
            true
        }
        Err(e) => {
            warn!(error = %e, "Message bus unavailable; running without events");
            false
        }
    }
}

#[cfg(not(feature = "publish"))]
pub async fn init(_amqp_url: Option<&String>, _exchange: &str) -> bool {
    false
}

/// Shared expansion of [`publish_info!`] and [`publish_error!`].
#[cfg(feature = "publish")]
#[doc(hidden)]
#[macro_export]
macro_rules! __publish_event {
    ($level:expr, $service:expr, $($($k:ident).+ = $val:expr),+ , $msg:literal) => {
        awful_publish::publish(
            $service,
            $level,
            $msg,
            vec![$(
                (stringify!($($k).+), serde_json::json!($val)),
            )+],
        )
    };
    ($level:expr, $service:expr, $msg:literal) => {
        awful_publish::publish($service, $level, $msg, vec![])
    };
}

/// Info-level event: `publish_info!(service, key = value, ..., "message")`.
///
/// Values go through `serde_json::json!`; keys may be dotted (`post.id`).
#[cfg(feature = "publish")]
#[macro_export]
macro_rules! publish_info {
    ($($tt:tt)*) => {
        $crate::__publish_event!(tracing::Level::INFO, $($tt)*)
    };
}

#[cfg(not(feature = "publish"))]
#[macro_export]
macro_rules! publish_info {
    ($service:expr, $($tt:tt)*) => {};
}

/// Error-level event, same syntax as [`publish_info!`].
#[cfg(feature = "publish")]
#[macro_export]
macro_rules! publish_error {
    ($($tt:tt)*) => {
        $crate::__publish_event!(tracing::Level::ERROR, $($tt)*)
    };
}

#[cfg(not(feature = "publish"))]
#[macro_export]
macro_rules! publish_error {
    ($service:expr, $($tt:tt)*) => {};
}
