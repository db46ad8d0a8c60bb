//! Selector-driven extraction of article listings from HTML pages.

use crate::scrapers::{RawItem, collapse_ws};
use chrono::{DateTime, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

/// How to read one site's listing page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteProfile {
    /// Selects item containers or the headline nodes themselves.
    pub item: &'static str,
    /// Link inside an item whose text is the title. `None` means the item's
    /// own text is the title and its link is the item, a descendant, or an
    /// ancestor anchor.
    pub link: Option<&'static str>,
    /// Teaser text inside an item.
    pub summary: Option<&'static str>,
    /// Only the first `scan_limit` matches are considered.
    pub scan_limit: usize,
    pub min_title_len: usize,
    pub title_prefix: &'static str,
    /// Lowercase href fragments that mark navigation rather than articles.
    pub exclude_href: &'static [&'static str],
}

pub fn parse_listing(body: &str, profile: &SiteProfile) -> Vec<RawItem> {
    let document = Html::parse_document(body);
    let Some(item_sel) = parse_selector(profile.item) else {
        return Vec::new();
    };
    let link_sel = profile.link.and_then(parse_selector);
    let summary_sel = profile.summary.and_then(parse_selector);
    let (Some(any_link), Some(time_sel)) = (parse_selector("a[href]"), parse_selector("time[datetime]"))
    else {
        return Vec::new();
    };

    document
        .select(&item_sel)
        .take(profile.scan_limit)
        .filter_map(|el| {
            let (title, href) = match &link_sel {
                Some(sel) => {
                    let a = el.select(sel).next()?;
                    (text_of(a), a.value().attr("href")?.to_string())
                }
                None => (text_of(el), link_for(el, &any_link)?),
            };
            if title.is_empty() {
                return None;
            }
            let lower = href.to_lowercase();
            if profile.exclude_href.iter().any(|x| lower.contains(x)) {
                return None;
            }
            let summary = summary_sel
                .as_ref()
                .and_then(|s| el.select(s).next())
                .map(text_of)
                .unwrap_or_default();
            let published_at = el
                .select(&time_sel)
                .next()
                .and_then(|t| t.value().attr("datetime"))
                .and_then(parse_date_attr);
            Some(RawItem {
                title: format!("{}{}", profile.title_prefix, title),
                href,
                summary,
                published_at,
            })
        })
        .collect()
}

fn parse_selector(s: &str) -> Option<Selector> {
    match Selector::parse(s) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!(selector = s, error = %e, "Invalid CSS selector");
            None
        }
    }
}

fn text_of(el: ElementRef) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

fn link_for(el: ElementRef, any_link: &Selector) -> Option<String> {
    if el.value().name() == "a" {
        return el.value().attr("href").map(str::to_string);
    }
    if let Some(a) = el.select(any_link).next() {
        return a.value().attr("href").map(str::to_string);
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "a")
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// `datetime` attributes come as full RFC 3339 stamps or bare dates.
fn parse_date_attr(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::ScraperKind;
    use crate::scrapers::sites::profile;

    #[test]
    fn headline_with_descendant_or_ancestor_link() {
        let html = r#"
            <h4><a href="/zantac-lawsuit-update/">Zantac Lawsuit Update Filed</a></h4>
            <a href="/ozempic-gastroparesis/"><h4>Ozempic Gastroparesis Claims Grow</h4></a>
            <h4><a href="/about/team">About Our Team</a></h4>
            <h4>No link here</h4>
        "#;
        let items = parse_listing(html, &profile(ScraperKind::AboutLawsuits));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Zantac Lawsuit Update Filed");
        assert_eq!(items[0].href, "/zantac-lawsuit-update/");
        assert_eq!(items[1].href, "/ozempic-gastroparesis/");
    }

    #[test]
    fn table_rows_with_prefix_and_summary() {
        let html = r#"
            <table><tbody>
              <tr><td><a href="/safety/recalls/acme-formula">Acme Formula</a></td><td>Possible Cronobacter contamination</td></tr>
              <tr><td>no link</td><td>ignored</td></tr>
            </tbody></table>
        "#;
        let items = parse_listing(html, &profile(ScraperKind::Fda));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "FDA Recall: Acme Formula");
        assert_eq!(items[0].summary, "Possible Cronobacter contamination");
    }

    #[test]
    fn article_cards_pick_up_time_element() {
        let html = r#"
            <article>
              <h2><a href="/2026/10/18/sanctions">Judge sanctions insurer for bad faith</a></h2>
              <time datetime="2026-10-18T09:30:00-05:00">Oct 18</time>
              <p>A federal judge ordered the insurer to pay.</p>
            </article>
        "#;
        let items = parse_listing(html, &profile(ScraperKind::CourthouseNews));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].published_at, NaiveDate::from_ymd_opt(2026, 10, 18));
        assert_eq!(items[0].summary, "A federal judge ordered the insurer to pay.");
    }

    #[test]
    fn scan_limit_is_respected() {
        let html: String = (0..30)
            .map(|i| format!(r#"<h3><a href="/s/{i}">Story number {i} about a lawsuit</a></h3>"#))
            .collect();
        let items = parse_listing(&html, &profile(ScraperKind::ConsumerSafety));
        assert_eq!(items.len(), profile(ScraperKind::ConsumerSafety).scan_limit);
    }

    #[test]
    fn parse_date_attr_variants() {
        assert_eq!(parse_date_attr("2026-10-18"), NaiveDate::from_ymd_opt(2026, 10, 18));
        assert_eq!(
            parse_date_attr("2026-10-18T23:00:00Z"),
            NaiveDate::from_ymd_opt(2026, 10, 18)
        );
        assert_eq!(parse_date_attr("yesterday"), None);
    }
}
