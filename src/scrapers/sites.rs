//! Listing profiles for the built-in news sites.

use crate::scrapers::ScraperKind;
use crate::scrapers::html::SiteProfile;

const HEADLINE: SiteProfile = SiteProfile {
    item: "article h2 a, article h3 a, h2 a, h3 a",
    link: None,
    summary: None,
    scan_limit: 10,
    min_title_len: 15,
    title_prefix: "",
    exclude_href: &[],
};

pub fn profile(kind: ScraperKind) -> SiteProfile {
    match kind {
        ScraperKind::AboutLawsuits => SiteProfile {
            item: "h4",
            min_title_len: 1,
            exclude_href: &["/about/"],
            ..HEADLINE
        },
        ScraperKind::Fda => SiteProfile {
            item: "table tbody tr, .views-row",
            link: Some(".views-field-brand-name a, td a"),
            summary: Some(".views-field-field-product-description-1, td:nth-child(2)"),
            min_title_len: 1,
            title_prefix: "FDA Recall: ",
            ..HEADLINE
        },
        ScraperKind::Eeoc => SiteProfile {
            item: ".views-row, .news-item, article",
            link: Some("h3 a, h2 a, .title a"),
            summary: Some("p, .summary, .description"),
            min_title_len: 1,
            ..HEADLINE
        },
        ScraperKind::Osha => SiteProfile {
            item: "h5, .views-row h3, .news-release-title",
            min_title_len: 1,
            ..HEADLINE
        },
        ScraperKind::CourthouseNews => SiteProfile {
            item: "article, .post, .story",
            link: Some("h2 a, h3 a, .headline a, .title a"),
            summary: Some("p, .excerpt, .summary"),
            min_title_len: 1,
            ..HEADLINE
        },
        ScraperKind::ConsumerSafety => SiteProfile {
            item: "h2 a, h3 a",
            min_title_len: 1,
            ..HEADLINE
        },
        ScraperKind::Bloomberg => SiteProfile {
            item: "article a, h2 a, h3 a, [class*=\"headline\"] a",
            min_title_len: 21,
            ..HEADLINE
        },
        ScraperKind::ApNews => SiteProfile {
            item: "a[class*=\"Link\"], h2 a, h3 a, [data-key=\"card-headline\"] a",
            scan_limit: 15,
            min_title_len: 21,
            ..HEADLINE
        },
        ScraperKind::Cnn => SiteProfile {
            item: "a[data-link-type=\"article\"], span.container__headline-text, h3 a",
            min_title_len: 16,
            ..HEADLINE
        },
        ScraperKind::NyTimes => SiteProfile {
            item: "article h2 a, article h3 a, [class*=\"story\"] a",
            min_title_len: 16,
            ..HEADLINE
        },
        ScraperKind::ProPublica => SiteProfile {
            item: "article h2 a, article h3 a, [class*=\"hed\"] a, .story-title a",
            min_title_len: 16,
            ..HEADLINE
        },
        ScraperKind::OnSceneTv => SiteProfile {
            item: "article h2 a, article h3 a, .post-title a, .entry-title a, h2 a, h3 a",
            min_title_len: 16,
            ..HEADLINE
        },
        ScraperKind::Rss => HEADLINE,
    }
}
