//! Pub/sub broker seam
//!
//! A broker offers a key/value slot for the cluster snapshot and a channel
//! for change messages. [`RedisBroker`] is the production transport;
//! [`MemoryBroker`] keeps a whole cluster inside one process.

use crate::common::{Error, Result};
use crate::store::ConfigValue;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Read a stored value
    async fn load(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a stored value
    async fn store(&self, key: &str, value: &str) -> Result<()>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Messages published on `channel` from now on. The stream ends when
    /// the subscription is lost.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>>;
}

/// In-process broker
#[derive(Default)]
pub struct MemoryBroker {
    values: Mutex<HashMap<String, String>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// End every live subscription on `channel`
    pub fn disconnect(&self, channel: &str) {
        self.channels.lock().remove(channel);
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        // Publishing with nobody listening is not an error
        let _ = self.sender(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let rx = self.sender(channel).subscribe();
        Ok(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory broker subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}

/// Redis-backed broker: one multiplexed connection for commands, a
/// dedicated connection per subscription
pub struct RedisBroker {
    client: redis::Client,
    connection: tokio::sync::Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisBroker {
    pub fn open(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: tokio::sync::Mutex::new(None),
        })
    }

    /// Accepts a `redis://` url or a `{host, port, auth}` map
    /// (`pass`/`password` are read as `auth` too)
    pub fn from_config(value: &ConfigValue) -> Result<Self> {
        Self::open(&redis_url(value)?)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop a connection that reported an I/O failure so the next call
    /// reconnects
    async fn reset_on_failure(&self, error: &redis::RedisError) {
        if error.is_io_error() || error.is_connection_dropped() {
            self.connection.lock().await.take();
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.reset_on_failure(&e).await;
                Err(e.into())
            }
        }
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        match conn.set::<_, _, ()>(key, value).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset_on_failure(&e).await;
                Err(e.into())
            }
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        match conn.publish::<_, _, ()>(channel, message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset_on_failure(&e).await;
                Err(e.into())
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!("dropping non-text pub/sub payload: {}", e);
                        None
                    }
                }
            })
            .boxed())
    }
}

fn redis_url(value: &ConfigValue) -> Result<String> {
    if let Some(url) = value.as_str() {
        return Ok(url.to_string());
    }

    let map = value
        .as_map()
        .ok_or_else(|| Error::InvalidConfig("redis must be a url or a table".into()))?;

    let host = map
        .get("host")
        .and_then(|v| v.as_str())
        .unwrap_or("localhost");
    let port = map.get("port").and_then(|v| v.as_u64()).unwrap_or(6379);
    let password = ["auth", "pass", "password"]
        .iter()
        .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
        .filter(|p| !p.is_empty());

    Ok(match password {
        Some(password) => format!(
            "redis://:{}@{}:{}/",
            utf8_percent_encode(password, NON_ALPHANUMERIC),
            host,
            port
        ),
        None => format!("redis://{}:{}/", host, port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redis_url() {
        assert_eq!(
            redis_url(&ConfigValue::from("redis://cache:6380/")).unwrap(),
            "redis://cache:6380/"
        );
        assert_eq!(
            redis_url(&ConfigValue::from(json!({"host": "cache", "port": 6380}))).unwrap(),
            "redis://cache:6380/"
        );
        assert_eq!(
            redis_url(&ConfigValue::from(json!({"pass": "p@ss"}))).unwrap(),
            "redis://:p%40ss@localhost:6379/"
        );
        assert!(redis_url(&ConfigValue::from(true)).is_err());
    }

    #[tokio::test]
    async fn test_memory_broker_roundtrip() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.load("versions").await.unwrap(), None);
        broker.store("versions", "{}").await.unwrap();
        assert_eq!(broker.load("versions").await.unwrap().as_deref(), Some("{}"));

        let mut first = broker.subscribe("versions").await.unwrap();
        let mut second = broker.subscribe("versions").await.unwrap();
        broker.publish("versions", "hello").await.unwrap();

        assert_eq!(first.next().await.as_deref(), Some("hello"));
        assert_eq!(second.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_memory_broker_disconnect_ends_stream() {
        let broker = MemoryBroker::new();
        let mut stream = broker.subscribe("versions").await.unwrap();
        broker.disconnect("versions");
        assert_eq!(stream.next().await, None);
    }
}
