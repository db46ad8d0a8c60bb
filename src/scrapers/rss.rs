//! RSS 2.0 feed parsing for feed-based sources.

use crate::error::{PipelineError, Result};
use crate::scrapers::RawItem;
use chrono::{DateTime, NaiveDate};
use quick_xml::de::from_str;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// HTML entities feeds like to use but XML does not define.
fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

pub fn parse_feed(body: &str) -> Result<Vec<RawItem>> {
    let rss: Rss = from_str(&scrub_html_entities(body))
        .map_err(|e| PipelineError::Parse(format!("invalid RSS: {e}")))?;
    Ok(rss
        .channel
        .items
        .into_iter()
        .filter_map(|it| {
            Some(RawItem {
                title: it.title?,
                href: it.link?,
                summary: it.description.as_deref().map(strip_tags).unwrap_or_default(),
                published_at: it.pub_date.as_deref().and_then(parse_pub_date),
            })
        })
        .collect())
}

fn parse_pub_date(s: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.date_naive())
}

fn strip_tags(s: &str) -> String {
    let fragment = scraper::Html::parse_fragment(s);
    fragment.root_element().text().collect::<Vec<_>>().join(" ")
}
