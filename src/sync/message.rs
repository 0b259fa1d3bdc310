//! Wire formats for cluster replication

use crate::common::{Error, Result};
use crate::store::{ConfigStore, SyncKey};
use serde::{Deserialize, Serialize};

/// One replicated mutation: `{"key", "value", "from", "node"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
    /// Value the publisher replaced
    #[serde(default)]
    pub from: serde_json::Value,
    /// Publishing node; absent for messages from older publishers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl SyncMessage {
    pub fn new(key: SyncKey, value: serde_json::Value, from: serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            value,
            from,
            node: None,
        }
    }

    pub fn from_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Decode and validate an inbound payload
    pub fn parse(raw: &str) -> Result<(SyncKey, SyncMessage)> {
        let message: SyncMessage = serde_json::from_str(raw)
            .map_err(|e| Error::Parse(format!("sync message: {}", e)))?;

        if message.key.is_empty() {
            return Err(Error::Validation("sync message without key".into()));
        }
        if message.value.is_null() {
            return Err(Error::Validation(format!(
                "sync message for `{}` without value",
                message.key
            )));
        }
        let key = SyncKey::parse(&message.key).ok_or_else(|| {
            Error::Validation(format!("`{}` is not a replicated key", message.key))
        })?;

        Ok((key, message))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Serialize the replicated keys of a store into one snapshot blob
pub fn encode_snapshot(store: &ConfigStore) -> Result<String> {
    let snapshot: serde_json::Map<String, serde_json::Value> = SyncKey::ALL
        .iter()
        .filter_map(|key| store.get(key.as_str()).map(|v| (key.to_string(), v.to_json())))
        .collect();
    Ok(serde_json::to_string(&snapshot)?)
}

/// Replicated entries of a snapshot blob. Unknown keys are skipped.
pub fn decode_snapshot(raw: &str) -> Result<Vec<(SyncKey, serde_json::Value)>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| Error::Parse(format!("snapshot: {}", e)))?;
    let serde_json::Value::Object(entries) = value else {
        return Err(Error::Parse("snapshot is not a JSON object".into()));
    };

    Ok(entries
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .filter_map(|(k, v)| SyncKey::parse(&k).map(|key| (key, v)))
        .collect())
}
