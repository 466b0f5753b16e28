use std::path::Path;
use std::sync::Arc;

use harvest_logging::{harvest_info, harvest_warn};

use crate::config::{ConfigError, EngineConfig};
use crate::coordinator::TaskCoordinator;
use crate::discover::Discoverer;
use crate::extract::{JsonLdExtractor, ProductExtractor, RemoteExtractor};
use crate::fetch::{Fetcher, ReqwestFetcher};
use crate::pipeline::PagePipeline;
use crate::render::PageRenderer;
use crate::scale::{CapacityController, CommandScaler, LogScaler, ScaleError, Scaler};
use crate::service::JobService;
use crate::store::{JobStore, MemoryStore, RonFileStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid scale command: {0}")]
    Scale(#[from] ScaleError),
    #[error("failed to build extractor client: {0}")]
    Extractor(#[from] reqwest::Error),
}

/// Owns every long-lived component of a running engine.
pub struct EngineHandle {
    service: JobService,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl EngineHandle {
    /// Wires the engine from `config`. Jobs live in `store_path` when given, in memory otherwise.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(config: &EngineConfig, store_path: Option<&Path>) -> Result<Self, EngineError> {
        config.validate()?;

        let store: Arc<dyn JobStore> = match store_path {
            Some(path) => Arc::new(RonFileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };

        let http: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new(config.fetch_settings()));
        let renderer = launch_renderer(config).await;
        let pages = Arc::new(PagePipeline::new(
            renderer.clone(),
            http.clone(),
            config.retry_policy(),
        ));
        let discovery = Arc::new(Discoverer::new(http, config.discovery_settings()));

        let extractor: Arc<dyn ProductExtractor> = match config.remote_extractor_settings() {
            Some(settings) => {
                harvest_info!("Extracting products via {}", settings.endpoint);
                Arc::new(RemoteExtractor::new(settings)?)
            }
            None => Arc::new(JsonLdExtractor),
        };

        let scaler: Arc<dyn Scaler> = match config.scale_command.as_deref() {
            Some(template) => Arc::new(CommandScaler::new(template)?),
            None => Arc::new(LogScaler),
        };
        let capacity = CapacityController::new(store.clone(), scaler, config.capacity_policy());
        let coordinator = TaskCoordinator::new(
            pages,
            extractor,
            store.clone(),
            config.coordinator_settings(),
        );

        Ok(Self {
            service: JobService::new(store, discovery, coordinator, capacity),
            renderer,
        })
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    /// Pauses running jobs, revokes outstanding batches and closes the browser.
    pub async fn shutdown(self) {
        self.service.shutdown().await;
        if let Some(renderer) = self.renderer {
            renderer.shutdown().await;
        }
        harvest_info!("Engine shut down");
    }
}

#[cfg(feature = "chrome")]
async fn launch_renderer(config: &EngineConfig) -> Option<Arc<dyn PageRenderer>> {
    if !config.use_browser {
        return None;
    }
    match crate::chrome::ChromeRenderer::launch(config.render_settings()).await {
        Ok(renderer) => Some(Arc::new(renderer)),
        Err(err) => {
            harvest_warn!("Chrome unavailable, pages will be fetched over HTTP only: {err}");
            None
        }
    }
}

#[cfg(not(feature = "chrome"))]
async fn launch_renderer(config: &EngineConfig) -> Option<Arc<dyn PageRenderer>> {
    if config.use_browser {
        harvest_warn!("Built without the chrome feature; pages will be fetched over HTTP only");
    }
    None
}
