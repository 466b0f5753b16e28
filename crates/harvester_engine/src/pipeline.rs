use std::sync::Arc;

use harvest_logging::{harvest_debug, harvest_warn};

use crate::decode::decode_html;
use crate::fetch::Fetcher;
use crate::render::PageRenderer;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Attempt, FetchError};

/// Raw HTML of one page, or nothing when every strategy failed.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Option<String>;
}

/// Renderer first with retry and backoff, then a plain HTTP GET as fallback.
///
/// Without a renderer the HTTP path becomes primary and gets the retries.
pub struct PagePipeline {
    renderer: Option<Arc<dyn PageRenderer>>,
    http: Arc<dyn Fetcher>,
    retry: RetryPolicy,
}

impl PagePipeline {
    pub fn new(
        renderer: Option<Arc<dyn PageRenderer>>,
        http: Arc<dyn Fetcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            renderer,
            http,
            retry,
        }
    }

    async fn http_once(&self, url: &str) -> Result<String, FetchError> {
        let output = self.http.fetch(url).await?;
        if !output.metadata.is_html() {
            return Err(FetchError::new(
                crate::FailureKind::Decode,
                format!(
                    "not an html page ({})",
                    output.metadata.content_type.unwrap_or_default()
                ),
            ));
        }
        decode_html(&output.bytes, output.metadata.content_type.as_deref())
            .map(|decoded| decoded.html)
            .map_err(|err| FetchError::new(crate::FailureKind::Decode, err.to_string()))
    }
}

#[async_trait::async_trait]
impl PageSource for PagePipeline {
    async fn fetch_html(&self, url: &str) -> Option<String> {
        let Some(renderer) = self.renderer.as_deref() else {
            let this = self;
            return match retry_with_backoff(&self.retry, url, move |_| async move {
                Attempt::classify(this.http_once(url).await)
            })
            .await
            {
                Ok(html) => Some(html),
                Err(err) => {
                    harvest_warn!("url={url} http fetch gave up: {err}");
                    None
                }
            };
        };

        match retry_with_backoff(&self.retry, url, move |_| async move {
            Attempt::classify(renderer.render(url).await)
        })
        .await
        {
            Ok(html) => return Some(html),
            Err(err) => harvest_warn!("url={url} rendering failed ({err}); falling back to http"),
        }

        match self.http_once(url).await {
            Ok(html) => {
                harvest_debug!("url={url} served by http fallback");
                Some(html)
            }
            Err(err) => {
                harvest_warn!("url={url} http fallback failed: {err}");
                None
            }
        }
    }
}
