//! Pub/sub replication of the curated keys
//!
//! Outbound: a local change to a replicated key persists the whole snapshot
//! under the namespace key, publishes `{key, value, from, node}` on the
//! namespace channel, then raises `stored:<key>`.
//!
//! Inbound: messages are applied with `change:` suppressed and `sync:`
//! raised, so nothing applied from the wire is published again. Applying a
//! value the store already holds is a no-op.
//!
//! Join: after the first subscription is up, the snapshot is read once and
//! applied the same way, then `sync#ready` fires.

use super::broker::Broker;
use super::message::{decode_snapshot, encode_snapshot, SyncMessage};
use super::SyncHandle;
use crate::common::Result;
use crate::store::{keys, ConfigEvent, ConfigStore, Events, SyncKey};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay before re-subscribing after the subscription dropped
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub struct PubSubSync {
    store: Arc<ConfigStore>,
    broker: Arc<dyn Broker>,
    namespace: String,
    node_id: String,
    destroyed: Arc<AtomicBool>,
}

impl PubSubSync {
    /// Start replicating `store` through `broker`. Must run inside a tokio
    /// runtime.
    pub fn start(store: Arc<ConfigStore>, broker: Arc<dyn Broker>, node_id: String) -> SyncHandle {
        let namespace = store
            .get_str(keys::NAMESPACE)
            .unwrap_or_else(|| "versions".to_string());
        let destroyed = Arc::new(AtomicBool::new(false));

        // Subscribe before returning so no local change is missed
        let events = store.subscribe();

        let sync = Arc::new(Self {
            store,
            broker,
            namespace,
            node_id,
            destroyed: destroyed.clone(),
        });

        info!(namespace = %sync.namespace, node = %sync.node_id, "pub/sub sync starting");
        let outbound = tokio::spawn(sync.clone().outbound(events));
        let inbound = tokio::spawn(sync.inbound());

        SyncHandle::new(destroyed, vec![outbound, inbound])
    }

    fn destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    async fn outbound(self: Arc<Self>, mut events: Events) {
        while let Some(event) = events.next().await {
            let ConfigEvent::Change { key, from, to } = event else {
                continue;
            };
            let Some(sync_key) = SyncKey::parse(&key) else {
                continue;
            };
            if self.destroyed() {
                break;
            }

            let message = SyncMessage::new(
                sync_key,
                to.to_json(),
                from.map(|v| v.to_json()).unwrap_or(serde_json::Value::Null),
            )
            .from_node(self.node_id.clone());

            let error = self.replicate(&message).await.err().map(|e| {
                warn!(key = %key, "replication failed: {}", e);
                e.to_string()
            });

            if self.destroyed() {
                break;
            }
            self.store.emit(ConfigEvent::Stored { key, error });
        }
    }

    /// Persist the snapshot, then publish. A failed persist does not stop
    /// the publish; the first failure is reported.
    async fn replicate(&self, message: &SyncMessage) -> Result<()> {
        let stored = match encode_snapshot(&self.store) {
            Ok(snapshot) => self.broker.store(&self.namespace, &snapshot).await,
            Err(e) => Err(e),
        };
        let published = match message.encode() {
            Ok(payload) => self.broker.publish(&self.namespace, &payload).await,
            Err(e) => Err(e),
        };
        stored.and(published)
    }

    async fn inbound(self: Arc<Self>) {
        let mut joined = false;

        while !self.destroyed() {
            match self.broker.subscribe(&self.namespace).await {
                Ok(mut messages) => {
                    if !joined {
                        joined = true;
                        self.join().await;
                    }

                    while let Some(raw) = messages.next().await {
                        if self.destroyed() {
                            return;
                        }
                        self.apply(&raw);
                    }
                    warn!(namespace = %self.namespace, "subscription lost");
                }
                Err(e) => warn!(namespace = %self.namespace, "subscribe failed: {}", e),
            }

            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    /// Catch up from the namespace snapshot, then signal ready
    async fn join(&self) {
        match self.broker.load(&self.namespace).await {
            Ok(Some(raw)) => match decode_snapshot(&raw) {
                Ok(entries) => {
                    if self.destroyed() {
                        return;
                    }
                    for (key, value) in entries {
                        self.store.apply_synced(key.as_str(), value);
                    }
                    debug!(namespace = %self.namespace, "snapshot applied");
                }
                Err(e) => error!(namespace = %self.namespace, "ignoring snapshot: {}", e),
            },
            Ok(None) => debug!(namespace = %self.namespace, "no snapshot yet"),
            Err(e) => warn!(namespace = %self.namespace, "snapshot read failed: {}", e),
        }

        if !self.destroyed() {
            self.store.emit(ConfigEvent::Ready);
        }
    }

    fn apply(&self, raw: &str) {
        let (key, message) = match SyncMessage::parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("dropping sync message: {}", e);
                return;
            }
        };

        if message.node.as_deref() == Some(self.node_id.as_str()) {
            return;
        }

        if self.store.apply_synced(key.as_str(), message.value) {
            debug!(key = %key, "applied replicated value");
        }
    }
}
