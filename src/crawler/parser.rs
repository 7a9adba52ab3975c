//! Link extraction
//!
//! The worker hands every fetched body to a [`LinkExtractor`]. The default
//! [`HtmlLinkExtractor`] parses HTML with scraper; callers can plug in their own
//! extractor for XML feeds, JSON APIs and the like.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Turns a fetched page into outbound URIs
///
/// Called once per successfully fetched page, from any worker.
pub trait LinkExtractor: Send + Sync {
    /// Returns absolute URIs found in `body`, resolved against `base_url`
    fn extract_links(&self, body: &str, content_type: Option<&str>, base_url: &Url)
        -> Vec<String>;
}

/// Extracts links from HTML pages
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
///
/// Relative links resolve against `<base href>` when the page declares one. Bodies
/// whose content type is set and is not HTML yield no links.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlLinkExtractor;

impl LinkExtractor for HtmlLinkExtractor {
    fn extract_links(
        &self,
        body: &str,
        content_type: Option<&str>,
        base_url: &Url,
    ) -> Vec<String> {
        let is_html = content_type.map_or(true, |ct| {
            let ct = ct.to_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml")
        });
        if !is_html {
            return Vec::new();
        }
        parse_links(body, base_url)
    }
}

/// Parses an HTML document and returns its links, deduplicated in document order
pub fn parse_links(html: &str, page_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let base_url = document_base(&document, page_url);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut push = |href: &str| {
        if let Some(absolute) = resolve_link(href, &base_url) {
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    };

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// The `<base href>` of the document, or the page URL
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|element| element.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None if the link should be excluded.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute.to_string()),
        _ => None,
    }
}
