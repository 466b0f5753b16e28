//! Headless Chrome renderer over the DevTools protocol.
use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, LoaderId, SetBlockedUrLsParams};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventLifecycleEvent, NavigateParams,
    SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures_util::{Stream, StreamExt};
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::agents::random_user_agent;
use crate::render::{
    cookie_dismissal_script, PageRenderer, RenderSettings, BLOCKED_URL_PATTERNS, WEBDRIVER_MASK,
};
use crate::{FailureKind, FetchError};

/// Lifecycle event marking a parsed document.
const DOM_READY: &str = "DOMContentLoaded";
/// Lifecycle event fired once the page has had no network activity for 500ms.
const NETWORK_IDLE: &str = "networkIdle";

pub struct ChromeRenderer {
    browser: RwLock<Option<Browser>>,
    handler: JoinHandle<()>,
    settings: RenderSettings,
}

impl ChromeRenderer {
    pub async fn launch(settings: RenderSettings) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder().no_sandbox();
        if let Some(path) = settings.executable.as_deref() {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(render_error)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(render_error)?;

        // The protocol handler must be polled for the browser to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        harvest_info!("Chrome renderer launched");

        Ok(Self {
            browser: RwLock::new(Some(browser)),
            handler,
            settings,
        })
    }

    async fn open_context(&self, browser: &Browser) -> Result<BrowserContextId, FetchError> {
        let params = CreateBrowserContextParams {
            proxy_server: self.settings.proxy.clone(),
            ..Default::default()
        };
        let created = browser.execute(params).await.map_err(render_error)?;
        Ok(created.result.browser_context_id)
    }

    async fn render_in_context(
        &self,
        browser: &Browser,
        context: BrowserContextId,
        url: &str,
    ) -> Result<String, FetchError> {
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(render_error)?;
        let page = browser.new_page(target).await.map_err(render_error)?;

        let outcome = self.drive_page(&page, url).await;
        if let Err(err) = page.close().await {
            harvest_warn!("url={url} failed to close page: {err}");
        }
        outcome
    }

    async fn drive_page(&self, page: &Page, url: &str) -> Result<String, FetchError> {
        page.execute(SetUserAgentOverrideParams::new(random_user_agent()))
            .await
            .map_err(render_error)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(WEBDRIVER_MASK))
            .await
            .map_err(render_error)?;
        page.execute(EnableParams::default())
            .await
            .map_err(render_error)?;
        let blocked = BLOCKED_URL_PATTERNS.iter().map(|p| p.to_string()).collect();
        page.execute(SetBlockedUrLsParams::new(blocked))
            .await
            .map_err(render_error)?;

        let mut lifecycle = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(render_error)?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(render_error)?;

        let navigation = async {
            let navigated = page
                .execute(NavigateParams::new(url))
                .await
                .map_err(render_error)?;
            if let Some(error) = navigated.result.error_text.as_deref().filter(|e| !e.is_empty()) {
                return Err(FetchError::new(
                    FailureKind::Render,
                    format!("navigation failed: {error}"),
                ));
            }
            let loader = navigated.result.loader_id.clone();
            if !wait_for_lifecycle(&mut lifecycle, loader.as_ref(), DOM_READY).await {
                return Err(render_error("page closed before the document was ready"));
            }
            Ok(loader)
        };
        let loader = match tokio::time::timeout(self.settings.navigation_timeout, navigation).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(FetchError::new(
                    FailureKind::Timeout,
                    format!("navigation exceeded {:?}", self.settings.navigation_timeout),
                ))
            }
        };

        // Idle wait is best effort; a busy page is still worth reading.
        let idle = wait_for_lifecycle(&mut lifecycle, loader.as_ref(), NETWORK_IDLE);
        match tokio::time::timeout(self.settings.network_idle_timeout, idle).await {
            Ok(true) => harvest_debug!("url={url} network idle"),
            Ok(false) => harvest_debug!("url={url} lifecycle events ended before network idle"),
            Err(_) => harvest_debug!("url={url} network never went idle"),
        }

        tokio::time::sleep(self.settings.random_delay()).await;

        match page.evaluate(cookie_dismissal_script()).await {
            Ok(result) => {
                if let Ok(Some(selector)) = result.into_value::<Option<String>>() {
                    harvest_info!("url={url} dismissed consent banner via {selector}");
                }
            }
            Err(err) => harvest_debug!("url={url} consent check failed: {err}"),
        }

        page.content().await.map_err(render_error)
    }
}

#[async_trait::async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| FetchError::new(FailureKind::Render, "renderer is shut down"))?;

        let context = self.open_context(browser).await?;
        let outcome = self.render_in_context(browser, context.clone(), url).await;
        if let Err(err) = browser
            .execute(DisposeBrowserContextParams::new(context))
            .await
        {
            harvest_warn!("url={url} failed to dispose browser context: {err}");
        }
        outcome
    }

    async fn shutdown(&self) {
        let mut guard = self.browser.write().await;
        if let Some(mut browser) = guard.take() {
            if let Err(err) = browser.close().await {
                harvest_warn!("Chrome did not close cleanly: {err}");
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        harvest_info!("Chrome renderer shut down");
    }
}

/// Consumes lifecycle events until `name` fires for the navigation `loader`.
/// Returns false if the stream ends first.
async fn wait_for_lifecycle<S>(events: &mut S, loader: Option<&LoaderId>, name: &str) -> bool
where
    S: Stream<Item = Arc<EventLifecycleEvent>> + Unpin,
{
    while let Some(event) = events.next().await {
        if event.name == name && loader.map_or(true, |loader| &event.loader_id == loader) {
            return true;
        }
    }
    false
}

fn render_error(err: impl std::fmt::Display) -> FetchError {
    FetchError::new(FailureKind::Render, err.to_string())
}
