use std::time::Duration;

use harvester_engine::{JsonLdExtractor, ProductExtractor, RemoteExtractor, RemoteExtractorSettings};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCT_PAGE: &str = r#"<html><head>
<title>Crema Facial | Tienda</title>
<script type="application/ld+json">
{"@context": "https://schema.org", "@type": "BreadcrumbList", "itemListElement": []}
</script>
<script type="application/ld+json">
{"@context": "https://schema.org", "@type": "Product",
 "name": "Crema Facial Hidratante", "sku": "CF-50", "gtin13": "7501234567890",
 "brand": {"@type": "Brand", "name": "Natura"},
 "image": ["https://cdn.shop.test/cf-50.jpg"],
 "offers": {"@type": "Offer", "price": "249,90", "priceCurrency": "MXN",
            "availability": "https://schema.org/InStock"}}
</script></head>
<body><h1>Crema Facial Hidratante</h1><p>50 ml</p></body></html>"#;

#[tokio::test]
async fn json_ld_product_becomes_a_record() {
    harvest_logging::initialize_for_tests();
    let record = JsonLdExtractor
        .extract("https://shop.test/p/cf-50", PRODUCT_PAGE)
        .await
        .expect("product record");
    assert_eq!(
        record,
        json!({
            "title": "Crema Facial Hidratante",
            "brand": "Natura",
            "sku": "CF-50",
            "ean": "7501234567890",
            "price": 249.9,
            "currency": "MXN",
            "inventory": "InStock",
            "image_url": "https://cdn.shop.test/cf-50.jpg",
            "source": "json-ld",
            "url": "https://shop.test/p/cf-50",
        })
    );
}

#[tokio::test]
async fn open_graph_tags_are_the_fallback() {
    harvest_logging::initialize_for_tests();
    let html = r#"<html><head>
        <meta property="og:type" content="product">
        <meta property="og:title" content="Taza de barro">
        <meta property="product:price:amount" content="120">
        <meta property="product:price:currency" content="MXN">
        </head><body></body></html>"#;
    let record = JsonLdExtractor
        .extract("https://shop.test/item/taza", html)
        .await
        .unwrap();
    assert_eq!(record["title"], "Taza de barro");
    assert_eq!(record["price"], 120.0);
    assert_eq!(record["source"], "opengraph");
}

#[tokio::test]
async fn page_without_product_markup_yields_nothing() {
    harvest_logging::initialize_for_tests();
    let html = "<html><head><title>About us</title></head><body><p>We sell things.</p></body></html>";
    assert_eq!(JsonLdExtractor.extract("https://shop.test/about", html).await, None);
}

fn remote(server: &MockServer) -> RemoteExtractor {
    RemoteExtractor::new(RemoteExtractorSettings {
        endpoint: format!("{}/extract", server.uri()),
        timeout: Duration::from_secs(5),
        max_chars: 10_000,
    })
    .unwrap()
}

#[tokio::test]
async fn remote_extractor_posts_page_text_and_returns_the_record() {
    harvest_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/extract"))
        .and(body_partial_json(json!({
            "url": "https://shop.test/p/cf-50",
            "title": "Crema Facial | Tienda",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "title": "Crema Facial Hidratante",
            "price": 249.9,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = remote(&server)
        .extract("https://shop.test/p/cf-50", PRODUCT_PAGE)
        .await
        .unwrap();
    assert_eq!(
        record,
        json!({
            "title": "Crema Facial Hidratante",
            "price": 249.9,
            "url": "https://shop.test/p/cf-50",
        })
    );
}

#[tokio::test]
async fn remote_null_or_error_means_no_record() {
    harvest_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/extract"))
        .and(body_partial_json(json!({"url": "https://shop.test/about"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/extract"))
        .and(body_partial_json(json!({"url": "https://shop.test/broken"})))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let extractor = remote(&server);
    let html = "<html><body><p>Just text</p></body></html>";
    assert_eq!(extractor.extract("https://shop.test/about", html).await, None);
    assert_eq!(extractor.extract("https://shop.test/broken", html).await, None);
}
