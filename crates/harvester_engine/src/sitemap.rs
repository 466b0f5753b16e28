//! Minimal sitemap protocol reader: `<loc>` values, index detection and robots.txt directives.
use url::Url;

/// Locations every sitemap discovery tries, relative to the domain root.
pub const WELL_KNOWN_SITEMAPS: [&str; 4] = [
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap.xml.gz",
    "/wp-sitemap.xml",
];

/// `<loc>` values in document order, unescaped and trimmed.
pub fn parse_locs(xml: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0usize;
    while let Some(open_idx) = xml[start..].find("<loc") {
        let tag_start = start + open_idx;
        let Some(tag_end_rel) = xml[tag_start..].find('>') else {
            break;
        };
        let open = tag_start + tag_end_rel + 1;
        // `<location>` and similar must not match.
        let tag_name = &xml[tag_start + 1..open - 1];
        if tag_name.trim_end_matches('/').trim() != "loc" {
            start = open;
            continue;
        }
        let Some(close_rel) = xml[open..].find("</loc>") else {
            break;
        };
        let close = open + close_rel;
        let value = unwrap_cdata(xml[open..close].trim());
        let value = unescape(value.trim());
        if !value.is_empty() {
            out.push(value);
        }
        start = close + "</loc>".len();
    }
    out
}

pub fn is_sitemap_index(xml: &str) -> bool {
    has_element(xml, "sitemapindex")
}

/// A document is only treated as a sitemap when it carries a `<urlset>` or `<sitemapindex>` root.
pub fn is_sitemap_document(xml: &str) -> bool {
    has_element(xml, "urlset") || is_sitemap_index(xml)
}

/// `Sitemap:` directives of a robots.txt, resolved against the domain root.
pub fn robots_sitemaps(robots: &str, root: &Url) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default().trim();
            let (key, value) = line.split_once(':')?;
            if !key.trim().eq_ignore_ascii_case("sitemap") {
                return None;
            }
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            root.join(value).ok().map(String::from)
        })
        .collect()
}

fn has_element(xml: &str, name: &str) -> bool {
    let open = format!("<{name}");
    let mut start = 0usize;
    while let Some(idx) = xml[start..].find(&open) {
        let after = start + idx + open.len();
        match xml[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => return true,
            None => return false,
            _ => start = after,
        }
    }
    false
}

fn unwrap_cdata(value: &str) -> &str {
    value
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(value)
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
