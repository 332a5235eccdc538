//! HTTP surface of the marketing portal.

use std::{path::Path, sync::Arc};

use db::DBService;
use portal::{
    gateway::{OpenAiCompatibleProvider, ReasoningProvider},
    signals::{SerpApiSource, TrendSource},
    CampaignWizard, PersistenceStore, PortalConfig, ProviderGateway,
};

pub mod error;
pub mod middleware;
pub mod response;
pub mod routes;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PortalConfig>,
    pub gateway: Arc<ProviderGateway>,
    pub wizard: Arc<CampaignWizard>,
}

impl AppState {
    pub fn new(
        config: Arc<PortalConfig>,
        gateway: Arc<ProviderGateway>,
        source: Arc<dyn TrendSource>,
        store: Arc<PersistenceStore>,
    ) -> Self {
        let wizard = Arc::new(CampaignWizard::new(config.clone(), gateway.clone(), source, store));
        Self {
            config,
            gateway,
            wizard,
        }
    }

    /// Wire the portal against the configured OpenAI-compatible providers,
    /// SerpAPI and the SQLite database at `config.database_path`.
    pub async fn from_config(config: Arc<PortalConfig>) -> anyhow::Result<Self> {
        config.validate()?;

        let db = DBService::new(Path::new(&config.database_path)).await?;
        tracing::info!("[DB] Database ready at {}", config.database_path);

        let providers: Vec<Arc<dyn ReasoningProvider>> = config
            .providers
            .iter()
            .map(|(name, endpoint)| {
                Arc::new(OpenAiCompatibleProvider::new(name.clone(), endpoint)) as Arc<dyn ReasoningProvider>
            })
            .collect();
        let gateway = Arc::new(ProviderGateway::new(config.clone(), providers)?);
        let source: Arc<dyn TrendSource> = Arc::new(SerpApiSource::new(&config.signals));
        let store = Arc::new(PersistenceStore::new(db, &config.cache));

        Ok(Self::new(config, gateway, source, store))
    }
}
