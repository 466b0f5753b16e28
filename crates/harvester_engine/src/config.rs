//! Engine configuration: an optional RON file, then environment overrides.
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use harvester_core::CapacityPolicy;
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorSettings;
use crate::discover::DiscoverySettings;
use crate::extract::RemoteExtractorSettings;
use crate::fetch::FetchSettings;
use crate::render::RenderSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("environment variable {name}={value:?} is invalid: {message}")]
    Env {
        name: &'static str,
        value: String,
        message: String,
    },
    #[error("invalid setting {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Every tunable of the engine, with the defaults used when nothing is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub page_timeout_ms: u64,
    pub network_idle_timeout_ms: u64,
    pub fetch_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    pub proxy: Option<String>,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_page_bytes: u64,
    pub workers_per_job: usize,
    pub per_container_concurrency: usize,
    pub crawl_page_cap: usize,
    pub max_sitemap_depth: usize,
    pub task_retries: u32,
    pub task_retry_delay_ms: u64,
    /// Render pages with headless Chrome when the `chrome` feature is built.
    pub use_browser: bool,
    pub chrome_executable: Option<String>,
    /// Remote extraction service; JSON-LD extraction is used when unset.
    pub extractor_endpoint: Option<String>,
    pub extractor_timeout_ms: u64,
    pub extractor_max_chars: usize,
    /// Command template run on capacity changes; `{count}` is replaced.
    pub scale_command: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_timeout_ms: 30_000,
            network_idle_timeout_ms: 15_000,
            fetch_retries: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 30_000,
            delay_min_secs: 0.0,
            delay_max_secs: 1.0,
            proxy: None,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_page_bytes: 20 * 1024 * 1024,
            workers_per_job: 3,
            per_container_concurrency: 3,
            crawl_page_cap: 500,
            max_sitemap_depth: 4,
            task_retries: 2,
            task_retry_delay_ms: 1_000,
            use_browser: true,
            chrome_executable: None,
            extractor_endpoint: None,
            extractor_timeout_ms: 60_000,
            extractor_max_chars: 48_000,
            scale_command: None,
        }
    }
}

impl EngineConfig {
    /// Defaults, overlaid by `path` when given, overlaid by the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&text).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Applies the recognised variables found by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PAGE_TIMEOUT_MS") {
            self.page_timeout_ms = parse_env("PAGE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("NETWORK_IDLE_TIMEOUT_MS") {
            self.network_idle_timeout_ms = parse_env("NETWORK_IDLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("FETCH_RETRIES") {
            self.fetch_retries = parse_env("FETCH_RETRIES", &v)?;
        }
        if let Some(v) = get("SCRAPER_DELAY_MIN") {
            self.delay_min_secs = parse_env("SCRAPER_DELAY_MIN", &v)?;
        }
        if let Some(v) = get("SCRAPER_DELAY_MAX") {
            self.delay_max_secs = parse_env("SCRAPER_DELAY_MAX", &v)?;
        }
        if let Some(v) = get("SCRAPER_PROXY") {
            self.proxy = Some(v.trim().to_string());
        }
        if let Some(v) = get("WORKERS_PER_JOB") {
            self.workers_per_job = parse_env("WORKERS_PER_JOB", &v)?;
        }
        if let Some(v) = get("PER_CONTAINER_CONCURRENCY") {
            self.per_container_concurrency = parse_env("PER_CONTAINER_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("CRAWL_PAGE_CAP") {
            self.crawl_page_cap = parse_env("CRAWL_PAGE_CAP", &v)?;
        }
        if let Some(v) = get("EXTRACTOR_ENDPOINT") {
            self.extractor_endpoint = Some(v.trim().to_string());
        }
        if let Some(v) = get("SCALE_COMMAND") {
            self.scale_command = Some(v.trim().to_string());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, message: &str| {
            Err(ConfigError::Invalid {
                field,
                message: message.to_string(),
            })
        };
        if self.delay_min_secs < 0.0 || self.delay_max_secs < self.delay_min_secs {
            return invalid("delay_secs", "expected 0 <= min <= max");
        }
        if self.per_container_concurrency == 0 {
            return invalid("per_container_concurrency", "must be at least 1");
        }
        if self.page_timeout_ms == 0 {
            return invalid("page_timeout_ms", "must be positive");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.fetch_retries.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_bytes: self.max_page_bytes,
            proxy: self.proxy.clone(),
            ..FetchSettings::default()
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            navigation_timeout: Duration::from_millis(self.page_timeout_ms),
            network_idle_timeout: Duration::from_millis(self.network_idle_timeout_ms),
            delay_secs: self.delay_min_secs..=self.delay_max_secs,
            proxy: self.proxy.clone(),
            executable: self.chrome_executable.clone(),
        }
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            crawl_page_cap: self.crawl_page_cap,
            max_sitemap_depth: self.max_sitemap_depth,
            retry: self.retry_policy(),
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            concurrency: self.per_container_concurrency,
            task_retries: self.task_retries,
            task_retry_delay: Duration::from_millis(self.task_retry_delay_ms),
        }
    }

    pub fn capacity_policy(&self) -> CapacityPolicy {
        CapacityPolicy {
            workers_per_job: self.workers_per_job,
            per_container_concurrency: self.per_container_concurrency,
        }
    }

    pub fn remote_extractor_settings(&self) -> Option<RemoteExtractorSettings> {
        self.extractor_endpoint
            .as_ref()
            .map(|endpoint| RemoteExtractorSettings {
                endpoint: endpoint.clone(),
                timeout: Duration::from_millis(self.extractor_timeout_ms),
                max_chars: self.extractor_max_chars,
            })
    }
}

fn parse_env<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Env {
        name,
        value: value.to_string(),
        message: err.to_string(),
    })
}
