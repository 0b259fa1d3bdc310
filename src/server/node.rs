//! Edge node: one HTTP server with its own config, cache, metrics and sync

use super::fetch::Fetcher;
use super::http::{create_router, EdgeState};
use super::negotiate::ContentNegotiator;
use crate::cache::ArtifactCache;
use crate::common::{MetricsRegistry, Result};
use crate::store::{keys, ConfigStore};
use crate::sync::{Broker, PubSubSync, RedisBroker, SyncHandle};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

pub struct EdgeNode {
    node_id: String,
    state: EdgeState,
    sync: Option<SyncHandle>,
    server: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl EdgeNode {
    /// Build a node around its config. Must run inside a tokio runtime.
    pub fn new(store: Arc<ConfigStore>) -> Result<Self> {
        let ttl = store
            .get_duration(keys::EXPIRE_INTERNAL_CACHE)
            .unwrap_or(DEFAULT_CACHE_TTL);
        let cache = ArtifactCache::new(ttl);
        cache.start();

        let metrics = Arc::new(MetricsRegistry::new());
        let fetcher = Fetcher::new(store.clone(), cache.clone(), metrics.clone())?;

        Ok(Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            state: EdgeState {
                negotiator: ContentNegotiator::new(store.clone()),
                store,
                cache,
                fetcher,
                metrics,
            },
            sync: None,
            server: None,
        })
    }

    /// Replicate the curated keys through `broker`
    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.sync = Some(PubSubSync::start(
            self.state.store.clone(),
            broker,
            self.node_id.clone(),
        ));
        self
    }

    /// Join the Redis cluster when the config asks for it (`sync = true`
    /// plus a `redis` entry). Otherwise the node runs standalone.
    pub fn with_configured_sync(self) -> Result<Self> {
        let store = &self.state.store;
        if !store.get_bool(keys::SYNC).unwrap_or(false) {
            return Ok(self);
        }
        let Some(redis) = store.get(keys::REDIS) else {
            tracing::warn!("sync enabled without a redis configuration; running standalone");
            return Ok(self);
        };
        let broker: Arc<dyn Broker> = Arc::new(RedisBroker::from_config(&redis)?);
        Ok(self.with_broker(broker))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.state.store
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.state.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.state.metrics
    }

    pub fn is_clustered(&self) -> bool {
        self.sync.is_some()
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Bind and serve in the background. Returns the bound address.
    pub async fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!("HTTP server error: {}", e);
            }
        });

        tracing::info!(addr = %local, node = %self.node_id, "edge node listening");
        self.server = Some((tx, task));
        Ok(local)
    }

    /// Serve on the configured port until ctrl-c
    pub async fn serve(mut self) -> Result<()> {
        let port = self.state.store.get_u64(keys::PORT).unwrap_or(8080);
        let port = u16::try_from(port)
            .map_err(|_| crate::Error::InvalidConfig(format!("invalid port: {}", port)))?;
        self.listen(SocketAddr::from(([0, 0, 0, 0], port))).await?;

        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down");
        self.end().await;
        Ok(())
    }

    /// Stop serving, stop replication and drop every cached artifact
    pub async fn end(&mut self) {
        if let Some(mut sync) = self.sync.take() {
            sync.shutdown();
        }
        if let Some((tx, task)) = self.server.take() {
            let _ = tx.send(());
            let _ = task.await;
        }
        self.state.cache.destroy();
    }
}
