//! Browser rendering seam.
//!
//! A [`PageRenderer`] turns a URL into fully rendered HTML. The Chrome
//! implementation lives behind the `chrome` cargo feature; without it the
//! pipeline relies on plain HTTP only.
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;

use crate::FetchError;

/// Consent-banner buttons tried in order; the first visible match is clicked.
pub const COOKIE_SELECTORS: [&str; 7] = [
    "[id*=\"cookie\"] a",
    "[class*=\"cookie\"] a",
    "[id*=\"banner\"] button",
    "[class*=\"banner\"] button",
    "button[id*=\"accept\"]",
    "button[class*=\"accept\"]",
    "button[aria-label*=\"Accept\"]",
];

/// Button captions accepted when no selector matched.
pub const CONSENT_CAPTIONS: [&str; 3] = ["Accept", "Aceptar", "OK"];

/// Resources never loaded while rendering.
pub const BLOCKED_URL_PATTERNS: [&str; 16] = [
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.avif", "*.svg", "*.ico", "*.css", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3",
];

/// Masks the automation flag some storefronts check before serving content.
pub const WEBDRIVER_MASK: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub navigation_timeout: Duration,
    pub network_idle_timeout: Duration,
    /// Randomized pause after load, in seconds.
    pub delay_secs: RangeInclusive<f64>,
    pub proxy: Option<String>,
    /// Chrome executable; `None` lets the launcher search the usual locations.
    pub executable: Option<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            network_idle_timeout: Duration::from_secs(15),
            delay_secs: 0.0..=1.0,
            proxy: None,
            executable: None,
        }
    }
}

impl RenderSettings {
    pub fn random_delay(&self) -> Duration {
        let (start, end) = (*self.delay_secs.start(), *self.delay_secs.end());
        if !(start >= 0.0 && end > start) {
            return Duration::from_secs_f64(start.max(0.0));
        }
        Duration::from_secs_f64(rand::rng().random_range(start..=end))
    }
}

#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders `url` once; retries are the caller's concern.
    async fn render(&self, url: &str) -> Result<String, FetchError>;

    /// Releases browser resources. Called once by the engine on shutdown.
    async fn shutdown(&self) {}
}

/// JavaScript that clicks the first visible consent control and returns what it matched.
pub(crate) fn cookie_dismissal_script() -> String {
    let selectors = serde_json::to_string(&COOKIE_SELECTORS).unwrap_or_else(|_| "[]".into());
    let captions = serde_json::to_string(&CONSENT_CAPTIONS).unwrap_or_else(|_| "[]".into());
    format!(
        r#"(() => {{
  const visible = (el) => !!(el && (el.offsetWidth || el.offsetHeight || el.getClientRects().length));
  for (const selector of {selectors}) {{
    let el = null;
    try {{ el = document.querySelector(selector); }} catch (_) {{ continue; }}
    if (visible(el)) {{ el.click(); return selector; }}
  }}
  for (const caption of {captions}) {{
    const button = Array.from(document.querySelectorAll('button'))
      .find((b) => visible(b) && b.textContent.trim() === caption);
    if (button) {{ button.click(); return 'button:' + caption; }}
  }}
  return null;
}})()"#
    )
}
