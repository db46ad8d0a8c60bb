//! Data models shared by the scrapers, the AI collaborator, and the CMS client.
//!
//! - [`NewsItem`]: a raw candidate article as scraped from a source
//! - [`GeneratedArticle`]: the LLM-written blog post, as parsed from its JSON reply
//! - [`Draft`]: a generated article plus its optional featured image
//! - [`ExistingPost`]: a post already in the CMS (internal links, title fixes)

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// CMS categories a post may be filed under.
pub const VALID_CATEGORIES: [&str; 12] = [
    "personal-injury",
    "medical-malpractice",
    "motor-vehicle",
    "wrongful-death",
    "dog-bites",
    "premises-liability",
    "product-liability",
    "employment-law",
    "civil-rights",
    "texas-law",
    "legal-tips",
    "case-studies",
];

/// A candidate article scraped from a news source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Headline as shown on the source page.
    pub title: String,
    /// Absolute article URL.
    pub url: String,
    /// Teaser text, empty when the source shows none.
    #[serde(default)]
    pub summary: String,
    /// Display name of the source (e.g. "EEOC News").
    pub source: String,
    /// Stable identifier of the source in the health ledger.
    pub source_id: String,
    /// Editorial category of the source (e.g. "mass_torts").
    pub category: String,
    /// Publication date when the page exposes one.
    #[serde(default)]
    pub published_at: Option<NaiveDate>,
    /// Short description of the story, attached by the selector.
    #[serde(default)]
    pub topic_summary: Option<String>,
}

impl NewsItem {
    /// Text used as the dedup key for this item.
    pub fn topic_text(&self) -> &str {
        &self.title
    }
}

/// A blog post as written by the LLM.
///
/// Every field is defaulted so a partially conforming reply still parses;
/// missing values are filled in by `content::validate_article`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArticle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub body_markdown: String,
    #[serde(default)]
    pub meta_title: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// `##` sections a news article must have. Evergreen guides are longer.
pub const EXPECTED_SECTIONS: usize = 6;

impl GeneratedArticle {
    /// Whether the body splits into exactly [`EXPECTED_SECTIONS`] sections.
    pub fn has_expected_sections(&self) -> bool {
        self.body_sections().len() == EXPECTED_SECTIONS
    }

    /// Split the body into its `##` sections, heading line included.
    pub fn body_sections(&self) -> Vec<String> {
        let mut sections: Vec<String> = Vec::new();
        for line in self.body_markdown.lines() {
            if line.trim_start().starts_with("## ") || sections.is_empty() {
                sections.push(String::new());
            }
            if let Some(current) = sections.last_mut() {
                current.push_str(line);
                current.push('\n');
            }
        }
        sections
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// An article ready for publishing.
#[derive(Debug, Clone)]
pub struct Draft {
    pub article: GeneratedArticle,
    /// PNG bytes of the featured image, if one was generated.
    pub image: Option<Vec<u8>>,
}

/// A post already stored in the CMS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExistingPost {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub slug: String,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// GROQ projections yield `null` for fields a document lacks.
fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// Render existing posts as the internal-link database handed to the writer.
pub fn link_database(posts: &[ExistingPost]) -> String {
    if posts.is_empty() {
        return "No existing posts found.".to_string();
    }
    posts
        .iter()
        .map(|p| {
            format!(
                "- Title: {}, Slug: {}, Summary: {}",
                p.title,
                p.slug,
                p.excerpt.as_deref().unwrap_or("No summary.")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
