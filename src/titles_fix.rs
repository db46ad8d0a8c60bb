//! `fix-titles`: shorten CMS post titles that run past the SEO limit.
//!
//! Each long title is sent to the shortener template. A reply still over the
//! limit gets one stricter re-ask, and whatever is still too long after that
//! is hard-truncated with `...`. Posts are handled one at a time; a failed
//! update is counted and the next post goes ahead.

use crate::api::AskAsync;
use crate::cms::SanityClient;
use crate::error::{PipelineError, Result};
use crate::models::ExistingPost;
use crate::utils::truncate_with_ellipsis;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

pub const DEFAULT_MAX_TITLE_LEN: usize = 60;
const PACING: Duration = Duration::from_millis(500);

/// Where post titles are read from and written back to.
pub trait PostTitles {
    async fn all_posts(&self) -> Result<Vec<ExistingPost>>;
    async fn update_title(&self, post_id: &str, title: &str) -> Result<()>;
}

impl PostTitles for SanityClient {
    async fn all_posts(&self) -> Result<Vec<ExistingPost>> {
        SanityClient::all_posts(self).await
    }

    async fn update_title(&self, post_id: &str, title: &str) -> Result<()> {
        SanityClient::update_title(self, post_id, title).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TitleChange {
    pub post_id: String,
    pub slug: String,
    pub original: String,
    pub shortened: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FixTitlesReport {
    pub scanned: usize,
    pub changes: Vec<TitleChange>,
    pub updated: usize,
    pub failed: usize,
    pub dry_run: bool,
}

impl fmt::Display for FixTitlesReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.changes.iter().enumerate() {
            writeln!(f, "[{}/{}] {}", i + 1, self.changes.len(), c.slug)?;
            writeln!(f, "  original ({} chars): {}", c.original.chars().count(), c.original)?;
            writeln!(f, "  new      ({} chars): {}", c.shortened.chars().count(), c.shortened)?;
        }
        if self.dry_run {
            write!(
                f,
                "dry run: {} of {} titles would change",
                self.changes.len(),
                self.scanned
            )
        } else {
            write!(f, "{} updated, {} failed", self.updated, self.failed)
        }
    }
}

fn clean_reply(reply: &str) -> String {
    reply
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

fn fits(title: &str, max_len: usize) -> bool {
    !title.is_empty() && title.chars().count() <= max_len
}

/// A title of at most `max_len` chars for `original`. Never fails: a model
/// error falls back to truncation.
pub async fn shorten_title<A>(asker: &A, original: &str, max_len: usize) -> String
where
    A: AskAsync<Response = String>,
{
    let first = json!({
        "title": original,
        "length": original.chars().count(),
        "max_length": max_len,
    });
    let candidate = match asker.ask(&first.to_string()).await {
        Ok(reply) => clean_reply(&reply),
        Err(e) => {
            warn!(error = %e, "Title shortening failed; truncating");
            return truncate_with_ellipsis(original, max_len);
        }
    };
    if fits(&candidate, max_len) {
        return candidate;
    }

    let basis = if candidate.is_empty() { original } else { &candidate };
    let stricter = json!({
        "title": basis,
        "length": basis.chars().count(),
        "max_length": max_len,
        "strict": true,
    });
    match asker.ask(&stricter.to_string()).await {
        Ok(reply) => {
            let second = clean_reply(&reply);
            if fits(&second, max_len) {
                second
            } else {
                let base = if second.is_empty() { basis } else { &second };
                truncate_with_ellipsis(base, max_len)
            }
        }
        Err(e) => {
            warn!(error = %e, "Stricter shortening failed; truncating");
            truncate_with_ellipsis(basis, max_len)
        }
    }
}

#[instrument(level = "info", skip(store, asker))]
pub async fn fix_titles<S, A>(
    store: &S,
    asker: &A,
    max_len: usize,
    dry_run: bool,
) -> Result<FixTitlesReport>
where
    S: PostTitles,
    A: AskAsync<Response = String>,
{
    if max_len < 4 {
        return Err(PipelineError::Configuration(format!(
            "--max-len must be at least 4, got {max_len}"
        )));
    }
    let posts = store.all_posts().await?;
    let long: Vec<ExistingPost> = posts
        .iter()
        .filter(|p| p.title.chars().count() > max_len)
        .cloned()
        .collect();
    info!(total = posts.len(), long = long.len(), max_len, "Scanned post titles");

    let changes: Vec<TitleChange> = stream::iter(long)
        .then(|post| async move {
            let shortened = shorten_title(asker, &post.title, max_len).await;
            TitleChange {
                post_id: post.id,
                slug: post.slug,
                original: post.title,
                shortened,
            }
        })
        .collect()
        .await;

    let mut report = FixTitlesReport {
        scanned: posts.len(),
        dry_run,
        ..Default::default()
    };
    if !dry_run {
        for (i, change) in changes.iter().enumerate() {
            if i > 0 {
                sleep(PACING).await;
            }
            match store.update_title(&change.post_id, &change.shortened).await {
                Ok(()) => {
                    info!(post_id = %change.post_id, title = %change.shortened, "Title updated");
                    report.updated += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(post_id = %change.post_id, error = %e, "Title update failed");
                    report.failed += 1;
                }
            }
        }
    }
    report.changes = changes;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::error::Error;

    struct Scripted {
        replies: RefCell<VecDeque<std::result::Result<String, String>>>,
        prompts: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<std::result::Result<&str, &str>>) -> Self {
            Self {
                replies: RefCell::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl AskAsync for Scripted {
        type Response = String;

        async fn ask(&self, text: &str) -> std::result::Result<String, Box<dyn Error>> {
            self.prompts.borrow_mut().push(text.to_string());
            match self.replies.borrow_mut().pop_front() {
                Some(Ok(r)) => Ok(r),
                Some(Err(e)) => Err(e.into()),
                None => Err("no scripted reply".into()),
            }
        }
    }

    #[derive(Default)]
    struct FakeStore {
        posts: Vec<ExistingPost>,
        fail_ids: Vec<String>,
        updates: RefCell<Vec<(String, String)>>,
    }

    impl PostTitles for FakeStore {
        async fn all_posts(&self) -> Result<Vec<ExistingPost>> {
            Ok(self.posts.clone())
        }

        async fn update_title(&self, post_id: &str, title: &str) -> Result<()> {
            if self.fail_ids.iter().any(|id| id == post_id) {
                return Err(PipelineError::Publish {
                    status: 409,
                    message: "conflict".into(),
                });
            }
            self.updates
                .borrow_mut()
                .push((post_id.to_string(), title.to_string()));
            Ok(())
        }
    }

    fn post(id: &str, title: &str) -> ExistingPost {
        ExistingPost {
            id: id.to_string(),
            title: title.to_string(),
            slug: format!("slug-{id}"),
            excerpt: None,
        }
    }

    const LONG: &str = "Texas Jury Awards Record Verdict to Family of Worker Killed in Refinery Explosion";

    #[tokio::test]
    async fn short_reply_is_used_with_quotes_stripped() {
        let asker = Scripted::new(vec![Ok("\"Texas Jury Awards Record Refinery Verdict\"\n")]);
        let t = shorten_title(&asker, LONG, 60).await;
        assert_eq!(t, "Texas Jury Awards Record Refinery Verdict");
        assert_eq!(asker.prompts.borrow().len(), 1);
    }

    #[tokio::test]
    async fn long_reply_gets_one_stricter_ask() {
        let asker = Scripted::new(vec![Ok(LONG), Ok("Record Refinery Verdict in Texas")]);
        let t = shorten_title(&asker, LONG, 60).await;
        assert_eq!(t, "Record Refinery Verdict in Texas");
        let prompts = asker.prompts.borrow();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("\"strict\":true"));
    }

    #[tokio::test]
    async fn still_long_after_reask_is_truncated() {
        let asker = Scripted::new(vec![Ok(LONG), Ok(LONG)]);
        let t = shorten_title(&asker, LONG, 60).await;
        assert!(t.ends_with("..."));
        assert!(t.chars().count() <= 60);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_truncation() {
        let asker = Scripted::new(vec![Err("quota exceeded")]);
        let t = shorten_title(&asker, LONG, 60).await;
        assert_eq!(t, truncate_with_ellipsis(LONG, 60));
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let store = FakeStore {
            posts: vec![post("a", LONG), post("b", "Short Title")],
            ..Default::default()
        };
        let asker = Scripted::new(vec![Ok("Record Refinery Verdict in Texas")]);
        let report = fix_titles(&store, &asker, 60, true).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].slug, "slug-a");
        assert!(store.updates.borrow().is_empty());
        assert!(report.to_string().contains("1 of 2 titles would change"));
    }

    #[tokio::test]
    async fn failed_update_does_not_stop_the_rest() {
        let store = FakeStore {
            posts: vec![post("a", LONG), post("b", LONG)],
            fail_ids: vec!["a".into()],
            ..Default::default()
        };
        let asker = Scripted::new(vec![Ok("First Short Title"), Ok("Second Short Title")]);
        let report = fix_titles(&store, &asker, 60, false).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            *store.updates.borrow(),
            vec![("b".to_string(), "Second Short Title".to_string())]
        );
    }

    #[tokio::test]
    async fn tiny_max_len_is_rejected() {
        let store = FakeStore::default();
        let asker = Scripted::new(vec![]);
        assert!(fix_titles(&store, &asker, 3, true).await.unwrap_err().is_fatal());
    }
}
