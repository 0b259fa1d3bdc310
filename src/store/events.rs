//! Change notifications emitted by a [`ConfigStore`](super::ConfigStore)

use super::ConfigValue;
use tokio::sync::broadcast;

/// Buffered events per store before slow receivers start lagging
pub const EVENT_CAPACITY: usize = 256;

/// Event name raised once a sync transport has joined its cluster
pub const READY: &str = "sync#ready";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEvent {
    /// Local mutation (`change:<key>`)
    Change {
        key: String,
        from: Option<ConfigValue>,
        to: ConfigValue,
    },
    /// Value applied from another node (`sync:<key>`)
    Sync {
        key: String,
        value: ConfigValue,
        previous: Option<ConfigValue>,
    },
    /// Outbound replication finished (`stored:<key>`), with the failure if any
    Stored { key: String, error: Option<String> },
    /// Cluster join completed (`sync#ready`)
    Ready,
}

impl ConfigEvent {
    pub fn name(&self) -> String {
        match self {
            ConfigEvent::Change { key, .. } => format!("change:{}", key),
            ConfigEvent::Sync { key, .. } => format!("sync:{}", key),
            ConfigEvent::Stored { key, .. } => format!("stored:{}", key),
            ConfigEvent::Ready => READY.to_string(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            ConfigEvent::Change { key, .. }
            | ConfigEvent::Sync { key, .. }
            | ConfigEvent::Stored { key, .. } => Some(key),
            ConfigEvent::Ready => None,
        }
    }
}

/// Receiving end of a store's event registry
pub struct Events {
    rx: broadcast::Receiver<ConfigEvent>,
}

impl Events {
    pub(super) fn new(rx: broadcast::Receiver<ConfigEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the store is gone.
    ///
    /// A lagging receiver skips what it missed and keeps going.
    pub async fn next(&mut self) -> Option<ConfigEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "config event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event carrying the given name
    pub async fn next_named(&mut self, name: &str) -> Option<ConfigEvent> {
        loop {
            let event = self.next().await?;
            if event.name() == name {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`Events::next`]
    pub fn try_next(&mut self) -> Option<ConfigEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
