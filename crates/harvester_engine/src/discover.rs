use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use harvester_core::urls::{
    dedupe_preserving_order, domain_root, has_excluded_extension, prefer_product_urls,
    same_origin, strip_fragment_and_query, InvalidDomain,
};
use url::Url;

use crate::decode::{decode_html, decode_xml};
use crate::fetch::Fetcher;
use crate::links::LinkExtractor;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::sitemap::{
    is_sitemap_document, is_sitemap_index, parse_locs, robots_sitemaps, WELL_KNOWN_SITEMAPS,
};
use crate::Attempt;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    /// Upper bound on pages visited by the crawl fallback.
    pub crawl_page_cap: usize,
    /// Nesting allowed below a top-level sitemap index.
    pub max_sitemap_depth: usize,
    pub retry: RetryPolicy,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            crawl_page_cap: 500,
            max_sitemap_depth: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    InvalidDomain(#[from] InvalidDomain),
}

/// Produces the candidate product URLs of one domain.
#[async_trait::async_trait]
pub trait UrlDiscovery: Send + Sync {
    async fn discover(&self, domain: &str) -> Result<Vec<String>, DiscoveryError>;
}

/// Sitemap first, breadth-first crawl when no sitemap yields anything.
pub struct Discoverer {
    fetcher: Arc<dyn Fetcher>,
    links: LinkExtractor,
    settings: DiscoverySettings,
}

enum Body {
    Xml,
    Html,
}

impl Discoverer {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: DiscoverySettings) -> Self {
        Self {
            fetcher,
            links: LinkExtractor::new(),
            settings,
        }
    }

    /// Fetches `url` with retry and decodes it. `None` on any failure; callers skip it.
    async fn fetch_text(&self, url: &str, body: Body) -> Option<(String, bool)> {
        let fetcher = self.fetcher.as_ref();
        let output = match retry_with_backoff(&self.settings.retry, url, move |_| async move {
            Attempt::classify(fetcher.fetch(url).await)
        })
        .await
        {
            Ok(output) => output,
            Err(err) => {
                harvest_debug!("url={url} skipped during discovery: {err}");
                return None;
            }
        };
        let is_html = output.metadata.is_html();
        let content_type = output.metadata.content_type.as_deref();
        let decoded = match body {
            Body::Xml => decode_xml(&output.bytes, content_type),
            Body::Html => decode_html(&output.bytes, content_type).map(|d| d.html),
        };
        match decoded {
            Ok(text) => Some((text, is_html)),
            Err(err) => {
                harvest_warn!("url={url} could not be decoded: {err}");
                None
            }
        }
    }

    async fn sitemap_candidates(&self, root: &Url) -> Vec<String> {
        let mut candidates: Vec<String> = WELL_KNOWN_SITEMAPS
            .iter()
            .filter_map(|path| root.join(path).ok())
            .map(String::from)
            .collect();

        if let Ok(robots_url) = root.join("/robots.txt") {
            if let Some((robots, _)) = self.fetch_text(robots_url.as_str(), Body::Html).await {
                candidates.extend(robots_sitemaps(&robots, root));
            }
        }

        if let Some((html, true)) = self.fetch_text(root.as_str(), Body::Html).await {
            candidates.extend(
                self.links
                    .sitemap_links(&html, root)
                    .into_iter()
                    .map(String::from),
            );
        }

        dedupe_preserving_order(candidates)
    }

    /// Page URLs listed by every reachable sitemap, nested indexes expanded.
    pub async fn from_sitemaps(&self, root: &Url) -> Vec<String> {
        let mut queue: VecDeque<(String, usize)> = self
            .sitemap_candidates(root)
            .await
            .into_iter()
            .map(|url| (url, 0))
            .collect();
        let mut visited = HashSet::new();
        let mut locs = Vec::new();

        while let Some((url, depth)) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }
            let Some((xml, _)) = self.fetch_text(&url, Body::Xml).await else {
                continue;
            };
            if !is_sitemap_document(&xml) {
                harvest_debug!("url={url} is not a sitemap document");
                continue;
            }
            let entries = parse_locs(&xml);
            if is_sitemap_index(&xml) {
                if depth >= self.settings.max_sitemap_depth {
                    harvest_warn!("url={url} sitemap index nested too deep; ignored");
                    continue;
                }
                harvest_info!("url={url} sitemap index with {} children", entries.len());
                // Children go first so that the output keeps document order.
                for child in entries.into_iter().rev() {
                    queue.push_front((child, depth + 1));
                }
            } else {
                harvest_info!("url={url} sitemap with {} entries", entries.len());
                locs.extend(entries);
            }
        }

        dedupe_preserving_order(locs)
            .into_iter()
            .filter(|url| !has_excluded_extension(url))
            .collect()
    }

    /// Breadth-first walk of same-origin pages starting at the root.
    pub async fn crawl(&self, root: &Url) -> Vec<String> {
        let cap = self.settings.crawl_page_cap;
        let mut queue = VecDeque::from([root.clone()]);
        let mut seen: HashSet<String> = HashSet::from([root.to_string()]);
        let mut found = Vec::new();

        while let Some(url) = queue.pop_front() {
            if found.len() >= cap {
                break;
            }
            let Some((html, is_html)) = self.fetch_text(url.as_str(), Body::Html).await else {
                continue;
            };
            found.push(url.to_string());
            harvest_debug!("url={url} crawled ({}/{cap})", found.len());
            if !is_html {
                continue;
            }
            for mut link in self.links.anchors(&html, &url) {
                strip_fragment_and_query(&mut link);
                if !same_origin(&link, root) || has_excluded_extension(link.as_str()) {
                    continue;
                }
                if seen.insert(link.to_string()) {
                    queue.push_back(link);
                }
            }
        }

        found
    }
}

#[async_trait::async_trait]
impl UrlDiscovery for Discoverer {
    async fn discover(&self, domain: &str) -> Result<Vec<String>, DiscoveryError> {
        let root = domain_root(domain)?;
        let mut urls = self.from_sitemaps(&root).await;
        if urls.is_empty() {
            harvest_warn!("domain={domain} no usable sitemap; crawling from {root}");
            urls = self.crawl(&root).await;
        }
        let total = urls.len();
        let urls = prefer_product_urls(urls);
        harvest_info!(
            "domain={domain} discovered {} urls ({} before product filter)",
            urls.len(),
            total
        );
        Ok(urls)
    }
}
