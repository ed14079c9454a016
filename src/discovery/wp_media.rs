//! WordPress media discovery
//!
//! Many document-heavy sites run WordPress and expose uploads through the
//! REST media endpoint that never appear in sitemaps. This pages through
//! `/wp-json/wp/v2/media` filtered by MIME type, recording each item's
//! source date and linking page.

use crate::discovery::requestor::HostRequestor;
use url::Url;

/// One media item surfaced by the WP REST API
#[derive(Debug, Clone)]
pub struct WpMediaItem {
    pub url: String,
    pub source_date: Option<String>,
    pub source_page: Option<String>,
}

/// Derives the MIME types to request from the configured file types
///
/// Explicit overrides win; otherwise PDFs are always included and Word
/// types are added when requested.
pub fn wp_mime_types(file_types: &[String], overrides: &[String]) -> Vec<String> {
    if !overrides.is_empty() {
        return overrides
            .iter()
            .filter(|m| !m.is_empty())
            .cloned()
            .collect();
    }

    let types: Vec<String> = file_types
        .iter()
        .map(|ft| ft.to_lowercase().trim_start_matches('.').to_string())
        .collect();

    let mut mime_types = vec!["application/pdf".to_string()];
    if types.iter().any(|t| t == "doc") {
        mime_types.push("application/msword".to_string());
    }
    if types.iter().any(|t| t == "docx") {
        mime_types.push(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
        );
    }
    mime_types.sort();
    mime_types
}

/// Pages through the WP media endpoint for one host
///
/// Stops at the page cap, the item cap, the first non-200 response, or the
/// first empty page. Endpoint errors just end the walk; WP discovery is
/// additive.
pub async fn fetch_wp_media(
    requestor: &HostRequestor,
    base_url: &str,
    max_pages: usize,
    max_items: usize,
    mime_types: &[String],
) -> Vec<WpMediaItem> {
    if max_pages == 0 || max_items == 0 {
        return Vec::new();
    }

    let root = match Url::parse(base_url) {
        Ok(url) if url.host_str().is_some() => {
            format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default())
        }
        _ => return Vec::new(),
    };

    let mut results: Vec<WpMediaItem> = Vec::new();

    for mime_type in mime_types {
        let mut page = 1usize;
        while page <= max_pages && results.len() < max_items {
            let endpoint = format!(
                "{}/wp-json/wp/v2/media?per_page=100&mime_type={}&page={}",
                root, mime_type, page
            );

            let items: Vec<serde_json::Value> = match requestor.get(&endpoint).await {
                Ok(response) if response.status().is_success() => {
                    match response.json().await {
                        Ok(serde_json::Value::Array(items)) => items,
                        Ok(_) | Err(_) => break,
                    }
                }
                Ok(_) | Err(_) => break,
            };

            if items.is_empty() {
                break;
            }

            for item in &items {
                let source_url = item
                    .get("source_url")
                    .and_then(|v| v.as_str())
                    .or_else(|| {
                        item.get("guid")
                            .and_then(|g| g.get("rendered"))
                            .and_then(|v| v.as_str())
                    });
                let source_url = match source_url {
                    Some(url) => url.to_string(),
                    None => continue,
                };

                results.push(WpMediaItem {
                    url: source_url,
                    source_date: item
                        .get("date")
                        .or_else(|| item.get("modified"))
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    source_page: item.get("link").and_then(|v| v.as_str()).map(String::from),
                });

                if results.len() >= max_items {
                    break;
                }
            }

            page += 1;
        }
    }

    results
}
