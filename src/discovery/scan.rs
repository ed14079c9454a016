//! Page-scan fallback
//!
//! When sitemaps do not surface enough file candidates, discovery fetches a
//! capped set of seed and keyword-matched pages and pulls file links out of
//! their HTML.

use crate::discovery::filter::{keyword_value, normalize_keywords};
use scraper::{Html, Selector};
use url::Url;

/// Extracts absolute link targets from an HTML page
///
/// Relative hrefs are resolved against the page URL; anything that fails
/// to resolve is dropped.
pub fn extract_links(html: &str, page_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("anchor selector");

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter(|href| !href.is_empty())
        .filter_map(|href| page_url.join(href).ok())
        .map(|url| url.to_string())
        .collect()
}

/// Orders candidate pages by keyword-overlap score
///
/// Pages whose path and query share more keyword tokens rank first; ties
/// break toward shorter URLs.
pub fn rank_pages_by_keywords(pages: &[String], keywords: &[String]) -> Vec<String> {
    let tokens = normalize_keywords(keywords);

    let mut scored: Vec<(usize, &String)> = pages
        .iter()
        .map(|page| {
            let value = keyword_value(page);
            let score = tokens.iter().filter(|token| value.contains(*token)).count();
            (score, page)
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.len().cmp(&b.1.len())));
    scored.into_iter().map(|(_, page)| page.clone()).collect()
}
