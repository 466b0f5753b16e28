use scraper::{Html, Selector};
use url::Url;

const DEFAULT_MAX_LINKS: usize = 5_000;

/// Pulls crawlable targets out of an HTML page.
#[derive(Debug, Clone, Copy)]
pub struct LinkExtractor {
    max_links_per_page: usize,
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self::with_max_links(DEFAULT_MAX_LINKS)
    }

    pub fn with_max_links(max_links_per_page: usize) -> Self {
        Self { max_links_per_page }
    }

    /// Absolute `http(s)` targets of every `<a href>`, in document order.
    pub fn anchors(&self, html: &str, base: &Url) -> Vec<Url> {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_url(href, base))
            .take(self.max_links_per_page)
            .collect()
    }

    /// Targets of `<link rel="sitemap" href>` entries.
    pub fn sitemap_links(&self, html: &str, base: &Url) -> Vec<Url> {
        let Ok(selector) = Selector::parse("link[rel][href]") else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        document
            .select(&selector)
            .filter(|element| {
                element
                    .value()
                    .attr("rel")
                    .is_some_and(|rel| rel.to_ascii_lowercase().contains("sitemap"))
            })
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_url(href, base))
            .collect()
    }
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_url(reference: &str, base: &Url) -> Option<Url> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
    {
        return None;
    }
    let url = base.join(trimmed).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
