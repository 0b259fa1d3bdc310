//! Client SDK: tag asset URLs and manage the cluster version
//!
//! Asset paths are spread over the configured alias hosts by consistent
//! hashing, and each tagged URL carries the current version
//! (`//cdn-2.example.com/versions:1.0.4/css/site.css`). The version is kept
//! current through the cluster broker when one is available, or by polling
//! the server otherwise.

use crate::common::{extname, Error, HashRing, Result};
use crate::store::{keys, ConfigEvent, ConfigStore, ConfigValue, Events};
use crate::sync::polling::{parse_version_body, version_url};
use crate::sync::{Broker, HttpPoller, PubSubSync, RedisBroker, SyncHandle};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Upper bound on waiting for the cluster to acknowledge a version change
const STORE_ACK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Default, Clone)]
pub struct ConnectOptions {
    /// Polling interval; the store's `polling interval` when unset
    pub interval: Option<Duration>,
    /// Replicate through this broker instead of the configured one
    pub broker: Option<Arc<dyn Broker>>,
}

pub struct Client {
    store: Arc<ConfigStore>,
    server: Option<String>,
    ring: Arc<RwLock<HashRing>>,
    http: reqwest::Client,
    clustered: bool,
    sync: Option<SyncHandle>,
    watcher: Option<JoinHandle<()>>,
}

impl Client {
    /// Connect to a versions server or cluster. Must run inside a tokio
    /// runtime.
    ///
    /// With a broker (given in `options`, or `sync = true` plus `redis` in
    /// the store) the client joins the cluster. Otherwise, when a server is
    /// given, it polls `<server>/version`.
    pub fn connect(
        store: Arc<ConfigStore>,
        server: Option<&str>,
        options: ConnectOptions,
    ) -> Result<Self> {
        let server = server
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());
        if let Some(server) = &server {
            store.set_with(keys::SERVER, server.as_str(), false);
        }

        let ring = Arc::new(RwLock::new(HashRing::new(
            store.get_strings(keys::ALIASES),
        )));
        let watcher = tokio::spawn(watch_aliases(store.subscribe(), ring.clone()));

        let broker = match options.broker {
            Some(broker) => Some(broker),
            None => configured_broker(&store)?,
        };

        let (clustered, sync) = match (broker, &server) {
            (Some(broker), _) => {
                let node_id = format!("{}:api", uuid::Uuid::new_v4());
                (true, Some(PubSubSync::start(store.clone(), broker, node_id)))
            }
            (None, Some(server)) => {
                let interval = options
                    .interval
                    .or_else(|| store.get_duration(keys::POLLING_INTERVAL))
                    .unwrap_or(DEFAULT_POLL_INTERVAL);
                (false, Some(HttpPoller::start(store.clone(), server, interval)?))
            }
            (None, None) => (false, None),
        };

        Ok(Self {
            store,
            server,
            ring,
            http: reqwest::Client::new(),
            clustered,
            sync,
            watcher: Some(watcher),
        })
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.store.get(key)
    }

    pub fn set(&self, key: &str, value: impl Into<ConfigValue>) -> bool {
        self.store.set(key, value)
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Versioned URL for an asset path on the host the ring picks for it.
    ///
    /// Falls back to the server, and returns the path untouched when there
    /// is no host at all. A scheme-relative host serving `.css` is forced to
    /// `https:` so older browsers do not fetch the stylesheet twice.
    pub fn tag(&self, path: &str) -> String {
        let picked = self.ring.read().get(path).map(str::to_string);
        let Some(mut host) = picked.or_else(|| self.server.clone()) else {
            return path.to_string();
        };

        if host.starts_with("//") && extname(path) == ".css" {
            host = format!("https:{}", host);
        }

        format!("{}{}", self.prefix(Some(&host)), path)
    }

    /// `<server>/versions:<version>`, or empty without a server
    pub fn prefix(&self, server: Option<&str>) -> String {
        let Some(server) = server.or(self.server.as_deref()) else {
            return String::new();
        };
        let version = self.store.get_str(keys::VERSION).unwrap_or_default();
        format!("{}/versions:{}", server, version)
    }

    /// Add a host to the ring and to the `aliases` entry
    pub fn alias(&self, host: &str) -> &Self {
        self.ring.write().add(host);
        self.store.set(keys::ALIASES, host);
        self
    }

    /// Set the cluster version, or bump its last numeric segment when
    /// `number` is `None`. Resolves with the version now in effect.
    pub async fn version(&self, number: Option<&str>) -> Result<String> {
        let next = match number {
            Some(n) => n.to_string(),
            None => bump_version(&self.store.get_str(keys::VERSION).unwrap_or_default())?,
        };

        if self.clustered {
            let mut events = self.store.subscribe();
            if !self.store.set(keys::VERSION, next.as_str()) {
                return Ok(next);
            }
            return match tokio::time::timeout(
                STORE_ACK_TIMEOUT,
                events.next_named("stored:version"),
            )
            .await
            {
                Ok(Some(ConfigEvent::Stored { error: None, .. })) => Ok(next),
                Ok(Some(ConfigEvent::Stored { error: Some(e), .. })) => Err(Error::Transport(e)),
                Ok(_) => Err(Error::Internal("config store closed".into())),
                Err(_) => Err(Error::Transport("version change not acknowledged".into())),
            };
        }

        self.store.set(keys::VERSION, next.as_str());
        let server = self
            .server
            .as_deref()
            .ok_or_else(|| Error::Validation("no server to push the version to".into()))?;
        let url = version_url(&self.store, server);

        let response = self
            .http
            .put(&url)
            .json(&serde_json::json!({ "version": next }))
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Err(Error::Upstream {
                url: server.to_string(),
                reason: format!("status {}", status.as_u16()),
            });
        }
        parse_version_body(&response.text().await?)
    }

    /// Stop syncing. In-flight poll responses are discarded.
    pub async fn end(&mut self) {
        if let Some(mut sync) = self.sync.take() {
            sync.shutdown();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

fn configured_broker(store: &ConfigStore) -> Result<Option<Arc<dyn Broker>>> {
    if !store.get_bool(keys::SYNC).unwrap_or(false) {
        return Ok(None);
    }
    match store.get(keys::REDIS) {
        Some(redis) => Ok(Some(Arc::new(RedisBroker::from_config(&redis)?))),
        None => Ok(None),
    }
}

/// Keep the ring in step with alias changes, local or replicated
async fn watch_aliases(mut events: Events, ring: Arc<RwLock<HashRing>>) {
    while let Some(event) = events.next().await {
        let hosts = match &event {
            ConfigEvent::Change { key, to, .. } if key == keys::ALIASES => to.strings(),
            ConfigEvent::Sync { key, value, .. } if key == keys::ALIASES => value.strings(),
            _ => continue,
        };
        let mut ring = ring.write();
        for host in hosts {
            ring.add(host);
        }
    }
}

/// `1.0.9` -> `1.0.10`
pub fn bump_version(current: &str) -> Result<String> {
    let (head, last) = match current.rsplit_once('.') {
        Some((head, last)) => (Some(head), last),
        None => (None, current),
    };
    let number: u64 = last
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("cannot bump version `{}`", current)))?;

    Ok(match head {
        Some(head) => format!("{}.{}", head, number + 1),
        None => (number + 1).to_string(),
    })
}
