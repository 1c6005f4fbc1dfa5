use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{
    client::SocialClient,
    config::Config,
    gateway::{InMemoryGateway, InstrumentedGateway, RemoteProcedureGateway, TimeoutGateway},
    persistence::SnapshotCache,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<SocialClient>,
    pub gateway: Arc<InstrumentedGateway>,
    pub cache: SnapshotCache,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // Backend, optionally bounded by a timeout, always instrumented
        let backend = InMemoryGateway::seeded()
            .with_latency(Duration::from_millis(config.gateway.latency_ms));
        let mut transport: Arc<dyn RemoteProcedureGateway> = Arc::new(backend);
        if let Some(timeout) = config.gateway_timeout() {
            transport = Arc::new(TimeoutGateway::new(transport, timeout));
        }
        let gateway = Arc::new(InstrumentedGateway::new(transport));

        // Start from the cached snapshot when it is still fresh
        let cache = SnapshotCache::connect(&config.cache.database_url, config.cache_max_age()).await?;
        let store = Store::new();
        if let Some(cached) = cache.load().await? {
            info!("hydrating store from snapshot saved at {}", cached.saved_at);
            store.hydrate(cached.snapshot);
        }

        Ok(Self::from_parts(store, gateway, cache, config))
    }

    pub fn from_parts(
        store: Store,
        gateway: Arc<InstrumentedGateway>,
        cache: SnapshotCache,
        config: Config,
    ) -> Self {
        let client = Arc::new(SocialClient::with_store(store, gateway.clone()));
        Self {
            client,
            gateway,
            cache,
            config,
        }
    }
}
