//! AI editorial collaborator: picks which candidates become posts and writes
//! them.
//!
//! Both jobs go through an [`AskAsync`] model client. Prompt instructions live
//! in the awful_aj chat templates; the text sent with each call is a JSON
//! document holding the call's inputs. Replies are expected to be JSON and are
//! repaired before giving up:
//!
//! 1. strip Markdown code fences
//! 2. escape raw control characters inside string literals
//! 3. re-ask once when the reply was cut off mid-document
//! 4. pull individual fields out with regexes
//!
//! A parsed article then passes [`validate_article`], which enforces the
//! CMS length limits and fills in anything the model left out.

use crate::api::AskAsync;
use crate::error::{PipelineError, Result};
use crate::images::GenerateImage;
use crate::models::{Draft, EXPECTED_SECTIONS, GeneratedArticle, NewsItem, VALID_CATEGORIES};
use crate::utils::{looks_truncated, slugify_title, truncate_for_log, truncate_with_ellipsis};
use chrono::NaiveDate;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use tracing::{debug, info, instrument, warn};

pub const EXCERPT_MAX: usize = 160;
pub const META_TITLE_MAX: usize = 60;
pub const META_DESCRIPTION_MAX: usize = 160;
const SUMMARY_PROMPT_MAX: usize = 200;
const RELATED_LIMIT: usize = 5;
const MAX_CATEGORIES: usize = 3;

const FALLBACK_KEYWORDS: [&str; 3] = ["personal injury", "legal news", "case evaluation"];
const FALLBACK_CATEGORY: &str = "legal-tips";

/// Chooses which candidates to write about.
pub trait SelectArticles {
    /// Up to `count` of `candidates`, each carrying a topic summary when the
    /// model gave one. An empty result is a valid answer.
    async fn select(
        &self,
        candidates: &[NewsItem],
        existing_topics: &[String],
        count: usize,
        today: NaiveDate,
    ) -> Result<Vec<NewsItem>>;
}

/// Writes a publishable draft.
pub trait WriteArticles {
    /// A news-based post. `pool` is the rest of today's candidates, used as
    /// related context.
    async fn generate(&self, item: &NewsItem, pool: &[NewsItem], link_database: &str) -> Result<Draft>;

    /// An evergreen guide for a queued title.
    async fn generate_from_title(&self, title: &str, link_database: &str) -> Result<Draft>;
}

#[derive(Debug, Default, Deserialize)]
struct SelectionReply {
    #[serde(default)]
    selected_indices: Vec<i64>,
    #[serde(default)]
    topic_summaries: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

/// The model-backed editor.
///
/// `A` talks to the language model, `I` paints featured images. Each prompt
/// kind has its own asker because each is bound to its own chat template.
#[derive(Debug)]
pub struct LlmEditor<A, I> {
    selector: A,
    writer: A,
    evergreen: A,
    images: Option<I>,
}

impl<A, I> LlmEditor<A, I>
where
    A: AskAsync<Response = String>,
    I: GenerateImage,
{
    pub fn new(selector: A, writer: A, evergreen: A, images: Option<I>) -> Self {
        Self {
            selector,
            writer,
            evergreen,
            images,
        }
    }

    async fn write_draft(&self, asker: &A, payload: &str, title_hint: &str) -> Result<Draft> {
        let article = ask_for_article(asker, payload).await?;
        let mut article = validate_article(article);
        if article.title.trim().is_empty() {
            article.title = title_hint.to_string();
        }
        if article.slug.is_empty() {
            article.slug = slugify_title(&article.title);
        }
        if article.body_markdown.trim().is_empty() {
            return Err(PipelineError::AiService(format!(
                "empty article body for '{}'",
                truncate_for_log(&article.title, 80)
            )));
        }
        info!(
            title = %article.title,
            sections = article.body_sections().len(),
            "Article generated"
        );

        let image = match &self.images {
            Some(images) if !article.alt_text.trim().is_empty() => {
                match images.generate_image(&article.alt_text).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(error = %e, "Image generation failed; publishing without image");
                        None
                    }
                }
            }
            _ => None,
        };
        Ok(Draft { article, image })
    }
}

impl<A, I> SelectArticles for LlmEditor<A, I>
where
    A: AskAsync<Response = String>,
    I: GenerateImage,
{
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len(), count = count))]
    async fn select(
        &self,
        candidates: &[NewsItem],
        existing_topics: &[String],
        count: usize,
        today: NaiveDate,
    ) -> Result<Vec<NewsItem>> {
        if candidates.is_empty() || count == 0 {
            return Ok(Vec::new());
        }
        let payload = selection_payload(candidates, existing_topics, count, today);
        let raw = self.selector.ask(&payload).await.map_err(ai_error)?;
        let reply: SelectionReply = match serde_json::from_str(&repair_json(&raw)) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, raw = %truncate_for_log(&raw, 300), "Unparseable selection reply");
                return Ok(Vec::new());
            }
        };
        info!(
            picked = reply.selected_indices.len(),
            reasoning = %reply.reasoning,
            "Selection reply"
        );
        Ok(apply_selection(candidates, reply, count))
    }
}

impl<A, I> WriteArticles for LlmEditor<A, I>
where
    A: AskAsync<Response = String>,
    I: GenerateImage,
{
    #[instrument(level = "info", skip_all, fields(title = %truncate_for_log(&item.title, 60)))]
    async fn generate(&self, item: &NewsItem, pool: &[NewsItem], link_database: &str) -> Result<Draft> {
        let related: Vec<&NewsItem> = pool
            .iter()
            .filter(|other| other.url != item.url)
            .take(RELATED_LIMIT)
            .collect();
        let payload = json!({
            "article": item,
            "related_news": related,
            "link_database": link_database,
            "valid_categories": VALID_CATEGORIES,
        })
        .to_string();
        let draft = self.write_draft(&self.writer, &payload, &item.title).await?;
        if !draft.article.has_expected_sections() {
            warn!(
                title = %draft.article.title,
                sections = draft.article.body_sections().len(),
                expected = EXPECTED_SECTIONS,
                "News article body has an unexpected section count"
            );
        }
        Ok(draft)
    }

    #[instrument(level = "info", skip_all, fields(title = %truncate_for_log(title, 60)))]
    async fn generate_from_title(&self, title: &str, link_database: &str) -> Result<Draft> {
        let payload = json!({
            "title": title,
            "link_database": link_database,
            "valid_categories": VALID_CATEGORIES,
        })
        .to_string();
        let mut draft = self.write_draft(&self.evergreen, &payload, title).await?;
        // Queued titles are published verbatim.
        draft.article.title = title.to_string();
        Ok(draft)
    }
}

fn ai_error(e: Box<dyn Error>) -> PipelineError {
    PipelineError::AiService(e.to_string())
}

fn selection_payload(
    candidates: &[NewsItem],
    existing_topics: &[String],
    count: usize,
    today: NaiveDate,
) -> String {
    let articles: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(index, item)| {
            json!({
                "index": index,
                "title": item.title,
                "source": item.source,
                "category": item.category,
                "summary": item.summary.chars().take(SUMMARY_PROMPT_MAX).collect::<String>(),
            })
        })
        .collect();
    json!({
        "today": today.format("%Y-%m-%d").to_string(),
        "count": count,
        "used_topics": existing_topics,
        "articles": articles,
    })
    .to_string()
}

/// Map the model's picks back onto candidates, skipping indices that are out
/// of range or repeated.
fn apply_selection(candidates: &[NewsItem], reply: SelectionReply, count: usize) -> Vec<NewsItem> {
    let mut summaries = reply.topic_summaries.into_iter();
    reply
        .selected_indices
        .into_iter()
        .map(|idx| (idx, summaries.next()))
        .filter_map(|(idx, summary)| {
            let Some(item) = usize::try_from(idx).ok().and_then(|i| candidates.get(i)) else {
                warn!(index = idx, "Selector returned an invalid index; skipping");
                return None;
            };
            let mut item = item.clone();
            item.topic_summary = summary.filter(|s| !s.trim().is_empty());
            Some(item)
        })
        .unique_by(|item| item.url.clone())
        .take(count)
        .collect()
}

/// Ask for an article and run the reply through the repair steps.
async fn ask_for_article<A>(asker: &A, payload: &str) -> Result<GeneratedArticle>
where
    A: AskAsync<Response = String>,
{
    let raw = asker.ask(payload).await.map_err(ai_error)?;
    match parse_article_reply(&raw) {
        Ok(article) => return Ok(article),
        Err(e) if looks_truncated(&e) => {
            warn!(error = %e, "Article reply truncated; asking again");
        }
        Err(e) => {
            warn!(error = %e, "Article reply is not valid JSON; trying field extraction");
            return extract_fields_fallback(&raw).ok_or_else(|| unparseable(&raw));
        }
    }

    let raw = asker.ask(payload).await.map_err(ai_error)?;
    match parse_article_reply(&raw) {
        Ok(article) => Ok(article),
        Err(e) => {
            warn!(error = %e, "Second article reply unusable; trying field extraction");
            extract_fields_fallback(&raw).ok_or_else(|| unparseable(&raw))
        }
    }
}

fn unparseable(raw: &str) -> PipelineError {
    PipelineError::AiService(format!(
        "unparseable article reply: {}",
        truncate_for_log(raw, 500)
    ))
}

pub fn parse_article_reply(raw: &str) -> std::result::Result<GeneratedArticle, serde_json::Error> {
    serde_json::from_str(&repair_json(raw))
}

fn repair_json(raw: &str) -> String {
    sanitize_json_control_chars(strip_code_fences(raw))
}

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?:json|JSON)?\s*").unwrap());
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").unwrap());

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let s = raw.trim();
    if !s.starts_with("```") {
        return s;
    }
    let start = FENCE_OPEN.find(s).map(|m| m.end()).unwrap_or(0);
    let end = FENCE_CLOSE
        .find(s)
        .map(|m| m.start())
        .filter(|&e| e >= start)
        .unwrap_or(s.len());
    s[start..end].trim()
}

/// Escape raw newlines, tabs and other control characters that appear
/// inside JSON string literals. Text outside strings is left alone.
pub fn sanitize_json_control_chars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            out.push(c);
            escape_next = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            c if in_string && (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

static BODY_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)"body_markdown"\s*:\s*"(.*?)"\s*,\s*"(?:meta_title|alt_text|meta_description|keywords|categories)""#,
    )
    .unwrap()
});
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).unwrap());

fn unescape(s: &str) -> String {
    s.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
}

fn string_field(raw: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r#""{name}"\s*:\s*"([^"\\]*(?:\\.[^"\\]*)*)""#)).ok()?;
    re.captures(raw).map(|c| unescape(&c[1]))
}

fn array_field(raw: &str, name: &str) -> Vec<String> {
    let Ok(re) = Regex::new(&format!(r#""{name}"\s*:\s*\[([^\]]*)\]"#)) else {
        return Vec::new();
    };
    re.captures(raw)
        .map(|c| {
            QUOTED
                .captures_iter(&c[1])
                .map(|q| q[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Salvage an article from a reply that will not parse as JSON. Needs at
/// least a title and a body.
pub fn extract_fields_fallback(raw: &str) -> Option<GeneratedArticle> {
    let title = string_field(raw, "title")?;
    let body_markdown = BODY_FIELD.captures(raw).map(|c| unescape(&c[1]))?;
    debug!(title = %title, "Recovered article fields by extraction");
    Some(GeneratedArticle {
        title,
        slug: string_field(raw, "slug").unwrap_or_default(),
        excerpt: string_field(raw, "excerpt")
            .map(|s| s.replace('\n', " "))
            .unwrap_or_default(),
        body_markdown,
        meta_title: string_field(raw, "meta_title").unwrap_or_default(),
        alt_text: string_field(raw, "alt_text").unwrap_or_default(),
        meta_description: string_field(raw, "meta_description").unwrap_or_default(),
        keywords: array_field(raw, "keywords"),
        categories: array_field(raw, "categories"),
    })
}

/// Enforce CMS limits and fill in missing fields.
pub fn validate_article(mut a: GeneratedArticle) -> GeneratedArticle {
    a.title = a.title.trim().to_string();
    a.excerpt = truncate_with_ellipsis(a.excerpt.trim(), EXCERPT_MAX);
    a.meta_title = truncate_with_ellipsis(a.meta_title.trim(), META_TITLE_MAX);
    a.meta_description = truncate_with_ellipsis(a.meta_description.trim(), META_DESCRIPTION_MAX);

    if a.alt_text.trim().is_empty() && !a.title.is_empty() {
        let subject: String = a.title.chars().take(80).collect();
        a.alt_text = format!("Professional image representing {subject}");
    }
    if a.meta_title.is_empty() {
        a.meta_title = truncate_with_ellipsis(&a.title, META_TITLE_MAX);
    }
    if a.meta_description.is_empty() {
        a.meta_description = a.excerpt.clone();
    }
    a.keywords.retain(|k| !k.trim().is_empty());
    if a.keywords.is_empty() {
        a.keywords = FALLBACK_KEYWORDS.iter().map(|k| k.to_string()).collect();
    }

    a.categories = a
        .categories
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| VALID_CATEGORIES.contains(&c.as_str()))
        .unique()
        .take(MAX_CATEGORIES)
        .collect();
    if a.categories.is_empty() {
        a.categories = vec![FALLBACK_CATEGORY.to_string()];
    }

    let slug_source = if a.slug.trim().is_empty() { &a.title } else { &a.slug };
    a.slug = slugify_title(slug_source);
    a
}
