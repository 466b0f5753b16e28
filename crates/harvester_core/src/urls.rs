//! URL heuristics shared by discovery and the job model.
use std::collections::HashSet;

use url::Url;

/// Path fragments that mark a product detail page on common storefronts.
const PRODUCT_MARKERS: [&str; 5] = ["/p/", "/product/", "/producto/", "/item/", "/dp/"];

/// Extensions of resources that are never product pages.
const EXCLUDED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "bmp", "svg", "ico", "css", "js", "mjs", "pdf",
    "zip", "gz", "tgz", "tar", "rar", "7z", "woff", "woff2", "ttf", "eot", "mp3", "mp4", "webm",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid domain '{domain}': {reason}")]
pub struct InvalidDomain {
    pub domain: String,
    pub reason: String,
}

/// Root URL of a domain given as `shop.example`, `https://shop.example` or any URL on it.
pub fn domain_root(domain: &str) -> Result<Url, InvalidDomain> {
    let trimmed = domain.trim();
    let invalid = |reason: &str| InvalidDomain {
        domain: domain.to_string(),
        reason: reason.to_string(),
    };
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let mut url = Url::parse(&with_scheme).map_err(|err| invalid(&err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https are supported"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

pub fn is_product_url(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url.to_ascii_lowercase(),
    };
    PRODUCT_MARKERS.iter().any(|marker| path.contains(marker))
}

/// Product URLs if there are any, otherwise everything.
pub fn prefer_product_urls(urls: Vec<String>) -> Vec<String> {
    let products: Vec<String> = urls.iter().filter(|u| is_product_url(u)).cloned().collect();
    if products.is_empty() {
        urls
    } else {
        products
    }
}

pub fn has_excluded_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((_, ext)) => EXCLUDED_EXTENSIONS
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Drops `#fragment` and `?query` so that crawl targets compare by page.
pub fn strip_fragment_and_query(url: &mut Url) {
    url.set_fragment(None);
    url.set_query(None);
}

pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Removes repeated entries, keeping the first occurrence of each.
pub fn dedupe_preserving_order(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
