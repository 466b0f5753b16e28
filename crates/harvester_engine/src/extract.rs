use std::time::Duration;

use harvest_logging::{harvest_debug, harvest_warn};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};

/// Turns a fetched page into a structured product record.
///
/// `None` means the page holds nothing usable; it is recorded as a failure
/// and never retried.
#[async_trait::async_trait]
pub trait ProductExtractor: Send + Sync {
    async fn extract(&self, url: &str, html: &str) -> Option<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub title: Option<String>,
    pub text: String,
    pub image_url: Option<String>,
}

/// Readable text of a page: headings, paragraphs and list items outside of
/// navigation chrome, truncated to `max_chars`.
pub fn page_text(html: &str, max_chars: usize) -> PageText {
    let doc = Html::parse_document(html);

    let title = select_first_text(&doc, "title");
    let image_url = meta_content(&doc, "og:image");

    let mut text = String::new();
    if let Ok(blocks) = Selector::parse("h1, h2, h3, p, li") {
        for element in doc.select(&blocks) {
            if inside_chrome(element) {
                continue;
            }
            let chunk = collapse_whitespace(&element.text().collect::<String>());
            if chunk.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&chunk);
            if text.chars().count() >= max_chars {
                break;
            }
        }
    }
    if text.chars().count() > max_chars {
        text = text.chars().take(max_chars).collect();
    }

    PageText {
        title,
        text,
        image_url,
    }
}

fn inside_chrome(element: ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value().as_element().is_some_and(|el| {
            matches!(
                el.name(),
                "nav" | "header" | "footer" | "script" | "style" | "noscript"
            )
        })
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn select_first_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .next()
        .map(|node| collapse_whitespace(&node.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

fn meta_content(doc: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse("meta[property], meta[name]").ok()?;
    doc.select(&selector)
        .find(|meta| {
            let el = meta.value();
            el.attr("property").or_else(|| el.attr("name")) == Some(property)
        })
        .and_then(|meta| meta.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

/// In-process extractor reading schema.org `Product` JSON-LD, with OpenGraph
/// product tags as a fallback.
#[derive(Debug, Default)]
pub struct JsonLdExtractor;

#[async_trait::async_trait]
impl ProductExtractor for JsonLdExtractor {
    async fn extract(&self, url: &str, html: &str) -> Option<Value> {
        let record = extract_structured(html);
        if record.is_none() {
            harvest_debug!("url={url} carries no product markup");
        }
        record.map(|mut record| {
            record.insert("url".into(), Value::String(url.to_string()));
            Value::Object(record)
        })
    }
}

fn extract_structured(html: &str) -> Option<Map<String, Value>> {
    let doc = Html::parse_document(html);
    let scripts = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
    let from_json_ld = doc
        .select(&scripts)
        .filter_map(|script| serde_json::from_str::<Value>(&script.inner_html()).ok())
        .find_map(|value| find_product(&value).map(product_record));
    from_json_ld.or_else(|| open_graph_record(&doc))
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            if is_product_type(map.get("@type")) {
                return Some(value);
            }
            map.get("@graph").and_then(find_product)
        }
        _ => None,
    }
}

fn is_product_type(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(kind)) => kind.eq_ignore_ascii_case("Product"),
        Some(Value::Array(kinds)) => kinds.iter().any(|k| is_product_type(Some(k))),
        _ => false,
    }
}

fn product_record(product: &Value) -> Map<String, Value> {
    let offer = match product.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    };
    let brand = match product.get("brand") {
        Some(Value::Object(brand)) => brand.get("name").cloned(),
        Some(Value::String(name)) => Some(Value::String(name.clone())),
        _ => None,
    };
    let image = match product.get("image") {
        Some(Value::Array(images)) => images.first().cloned(),
        Some(Value::Object(image)) => image.get("url").cloned(),
        other => other.cloned(),
    };
    let availability = offer
        .and_then(|o| o.get("availability"))
        .and_then(Value::as_str)
        .map(|a| a.rsplit('/').next().unwrap_or(a).to_string());

    let mut record = Map::new();
    insert_some(&mut record, "title", product.get("name").cloned());
    insert_some(&mut record, "brand", brand);
    insert_some(&mut record, "description", product.get("description").cloned());
    insert_some(&mut record, "sku", product.get("sku").cloned());
    insert_some(
        &mut record,
        "ean",
        product
            .get("gtin13")
            .or_else(|| product.get("gtin"))
            .cloned(),
    );
    insert_some(&mut record, "price", offer.and_then(|o| o.get("price")).map(price_value));
    insert_some(
        &mut record,
        "currency",
        offer.and_then(|o| o.get("priceCurrency")).cloned(),
    );
    insert_some(&mut record, "inventory", availability.map(Value::String));
    insert_some(&mut record, "image_url", image);
    record.insert("source".into(), json!("json-ld"));
    record
}

fn price_value(price: &Value) -> Value {
    match price {
        Value::String(text) => text
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .and_then(|number| serde_json::Number::from_f64(number).map(Value::Number))
            .unwrap_or_else(|| price.clone()),
        other => other.clone(),
    }
}

fn open_graph_record(doc: &Html) -> Option<Map<String, Value>> {
    let og_type = meta_content(doc, "og:type");
    let price = meta_content(doc, "product:price:amount");
    let is_product = og_type.is_some_and(|t| t.eq_ignore_ascii_case("product")) || price.is_some();
    if !is_product {
        return None;
    }
    let title = meta_content(doc, "og:title").or_else(|| select_first_text(doc, "h1"))?;

    let mut record = Map::new();
    record.insert("title".into(), Value::String(title));
    insert_some(
        &mut record,
        "description",
        meta_content(doc, "og:description").map(Value::String),
    );
    insert_some(
        &mut record,
        "price",
        price.map(|p| price_value(&Value::String(p))),
    );
    insert_some(
        &mut record,
        "currency",
        meta_content(doc, "product:price:currency").map(Value::String),
    );
    insert_some(
        &mut record,
        "image_url",
        meta_content(doc, "og:image").map(Value::String),
    );
    record.insert("source".into(), json!("opengraph"));
    Some(record)
}

fn insert_some(record: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value.filter(|v| !v.is_null()) {
        record.insert(key.to_string(), value);
    }
}

#[derive(Debug, Clone)]
pub struct RemoteExtractorSettings {
    pub endpoint: String,
    pub timeout: Duration,
    /// Page text beyond this many characters is not sent.
    pub max_chars: usize,
}

/// Posts cleaned page text to an extraction service and returns its JSON record.
///
/// The service answers `200` with a JSON object, or `null` / a non-object when
/// the page is not a product.
pub struct RemoteExtractor {
    client: reqwest::Client,
    settings: RemoteExtractorSettings,
}

impl RemoteExtractor {
    pub fn new(settings: RemoteExtractorSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }
}

#[async_trait::async_trait]
impl ProductExtractor for RemoteExtractor {
    async fn extract(&self, url: &str, html: &str) -> Option<Value> {
        let page = page_text(html, self.settings.max_chars);
        if page.text.is_empty() {
            harvest_debug!("url={url} has no readable text to extract from");
            return None;
        }
        let request = json!({
            "url": url,
            "title": page.title,
            "image_url": page.image_url,
            "text": page.text,
        });

        let response = match self
            .client
            .post(&self.settings.endpoint)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                harvest_warn!("url={url} extraction request failed: {err}");
                return None;
            }
        };
        if !response.status().is_success() {
            harvest_warn!("url={url} extraction service answered {}", response.status());
            return None;
        }
        match response.json::<Value>().await {
            Ok(Value::Object(mut record)) => {
                record
                    .entry("url")
                    .or_insert_with(|| Value::String(url.to_string()));
                Some(Value::Object(record))
            }
            Ok(_) => None,
            Err(err) => {
                harvest_warn!("url={url} extraction response was not json: {err}");
                None
            }
        }
    }
}
