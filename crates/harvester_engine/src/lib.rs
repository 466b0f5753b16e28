//! Harvester engine: discovery, page fetching, extraction, persistence and
//! execution of the effects produced by the core state machine.
mod agents;
#[cfg(feature = "chrome")]
mod chrome;
mod config;
mod coordinator;
mod decode;
mod discover;
mod engine;
mod export;
mod extract;
mod fetch;
mod links;
mod persist;
mod pipeline;
mod render;
mod retry;
mod scale;
mod service;
pub mod sitemap;
mod store;
mod types;

pub use agents::{random_user_agent, USER_AGENTS};
#[cfg(feature = "chrome")]
pub use chrome::ChromeRenderer;
pub use config::{ConfigError, EngineConfig};
pub use coordinator::{CoordinatorSettings, TaskCoordinator, NO_HTML, NO_RECORD};
pub use decode::{decode_html, decode_xml, DecodeError, DecodedHtml};
pub use discover::{Discoverer, DiscoveryError, DiscoverySettings, UrlDiscovery};
pub use engine::{EngineError, EngineHandle};
pub use export::{export_results, ExportError, ExportSummary, MANIFEST_FILENAME, RESULTS_FILENAME};
pub use extract::{
    page_text, JsonLdExtractor, PageText, ProductExtractor, RemoteExtractor,
    RemoteExtractorSettings,
};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use links::LinkExtractor;
pub use persist::{append_line, ensure_dir, AtomicFileWriter, PersistError};
pub use pipeline::{PagePipeline, PageSource};
pub use render::{
    PageRenderer, RenderSettings, BLOCKED_URL_PATTERNS, CONSENT_CAPTIONS, COOKIE_SELECTORS,
};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use scale::{CapacityController, CommandScaler, LogScaler, ScaleError, Scaler};
pub use service::{JobService, ServiceError, INTERRUPTED_DISCOVERY};
pub use store::{JobStore, MemoryStore, RonFileStore, StoreError};
pub use types::{Attempt, FailureKind, FetchError, FetchMetadata, FetchOutput};
