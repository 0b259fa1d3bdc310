//! Per-node configuration store
//!
//! A typed key/value map with merge-on-set, duration conversion for a fixed
//! set of keys, and a broadcast registry of change events. Every node and
//! client owns its own `Arc<ConfigStore>`; nothing here is global.

pub mod events;
pub mod keys;
pub mod value;

pub use events::{ConfigEvent, Events};
pub use keys::SyncKey;
pub use value::ConfigValue;

use crate::common::utils::parse_duration;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct ConfigStore {
    entries: Mutex<BTreeMap<String, ConfigValue>>,
    events: broadcast::Sender<ConfigEvent>,
}

impl ConfigStore {
    /// Empty store, no defaults
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(events::EVENT_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    /// Store seeded with the default node configuration
    pub fn with_defaults() -> Self {
        let store = Self::new();
        store.set_with(keys::VERSION, "0.0.0", false);
        store.set_with(keys::ALIASES, Vec::<String>::new(), false);
        store.set_with(keys::MAX_AGE, "30 days", false);
        store.set_with(keys::EXPIRE_INTERNAL_CACHE, "1 hour", false);
        store.set_with(keys::POLLING_INTERVAL, "10 seconds", false);
        store.set_with(keys::BLACKLISTED_EXTENSIONS, Vec::<String>::new(), false);
        store.set_with(keys::FORCE_EXTENSIONS, true, false);
        store.set_with(keys::ORIGIN_SERVERS, Vec::<String>::new(), false);
        store.set_with(keys::CORS, "*", false);
        store.set_with(keys::PORT, 8080u64, false);
        store.set_with(keys::NAMESPACE, "versions", false);
        store.set_with(keys::SYNC, false, false);
        store.set_with(keys::LOG_LEVEL, "info", false);
        store
    }

    /// Independent copy of the current entries with its own event registry
    pub fn fork(&self) -> Self {
        let (events, _) = broadcast::channel(events::EVENT_CAPACITY);
        Self {
            entries: Mutex::new(self.entries.lock().clone()),
            events,
        }
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.entries.lock().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.get(key).and_then(|v| v.as_duration())
    }

    /// String members of a list value; empty when absent
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        self.get(key).map(|v| v.strings()).unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Merge a value into `key` and emit `change:<key>`.
    ///
    /// Returns whether the stored value changed.
    pub fn set(&self, key: &str, value: impl Into<ConfigValue>) -> bool {
        self.set_with(key, value, true)
    }

    /// Merge a value into `key`, emitting `change:<key>` only when `emit` is set.
    ///
    /// Setting a value equal to the current one is a no-op and emits
    /// nothing. A duration key given text that does not parse is left alone.
    pub fn set_with(&self, key: &str, value: impl Into<ConfigValue>, emit: bool) -> bool {
        let mut value = value.into();
        if keys::is_duration_key(key) {
            match to_duration(value) {
                Some(converted) => value = converted,
                None => {
                    tracing::warn!(key = %key, "ignoring unparsable duration");
                    return false;
                }
            }
        }

        let (from, to) = {
            let mut entries = self.entries.lock();
            let current = entries.get(key).cloned();
            let next = match &current {
                Some(existing) => existing.merge(value),
                None => value,
            };
            if current.as_ref() == Some(&next) {
                return false;
            }
            entries.insert(key.to_string(), next.clone());
            (current, next)
        };

        if emit {
            self.emit(ConfigEvent::Change {
                key: key.to_string(),
                from,
                to,
            });
        }
        true
    }

    /// Apply a value that came from another node.
    ///
    /// `change:<key>` is suppressed so the update never loops back out;
    /// `sync:<key>` is raised instead, and only when local state changed.
    pub fn apply_synced(&self, key: &str, value: impl Into<ConfigValue>) -> bool {
        let previous = self.get(key);
        if !self.set_with(key, value, false) {
            return false;
        }
        if let Some(value) = self.get(key) {
            self.emit(ConfigEvent::Sync {
                key: key.to_string(),
                value,
                previous,
            });
        }
        true
    }

    /// Raise an event on this store's registry
    pub fn emit(&self, event: ConfigEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> Events {
        Events::new(self.events.subscribe())
    }

    /// JSON object holding every entry
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("keys", &self.keys())
            .finish()
    }
}

fn to_duration(value: ConfigValue) -> Option<ConfigValue> {
    match value {
        ConfigValue::Duration(_) => Some(value),
        ConfigValue::Scalar(serde_json::Value::Number(n)) => n
            .as_f64()
            .filter(|ms| *ms >= 0.0)
            .map(|ms| ConfigValue::Duration(ms.round() as u64)),
        ConfigValue::Scalar(serde_json::Value::String(text)) => {
            parse_duration(&text).ok().map(ConfigValue::from)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = ConfigStore::with_defaults();
        assert_eq!(store.get_str("version").as_deref(), Some("0.0.0"));
        assert_eq!(
            store.get_duration("max age"),
            Some(Duration::from_secs(30 * 86_400))
        );
        assert_eq!(
            store.get_duration("polling interval"),
            Some(Duration::from_secs(10))
        );
        assert_eq!(store.get_bool("force extensions"), Some(true));
        assert!(store.get("auth").is_none());
        assert!(store.get("no such key").is_none());
    }

    #[test]
    fn test_duration_keys_convert() {
        let store = ConfigStore::new();
        assert!(store.set("expire internal cache", "17 hours"));
        assert_eq!(
            store.get("expire internal cache"),
            Some(ConfigValue::Duration(61_200_000))
        );

        assert!(store.set("max age", 2500u64));
        assert_eq!(store.get_duration("max age"), Some(Duration::from_millis(2500)));

        assert!(!store.set("max age", "soon"));
        assert_eq!(store.get_duration("max age"), Some(Duration::from_millis(2500)));
    }

    #[tokio::test]
    async fn test_change_event() {
        let store = ConfigStore::with_defaults();
        let mut events = store.subscribe();

        assert!(store.set("version", "0.0.1"));
        let event = events.next_named("change:version").await.unwrap();
        assert_eq!(
            event,
            ConfigEvent::Change {
                key: "version".into(),
                from: Some("0.0.0".into()),
                to: "0.0.1".into(),
            }
        );
    }

    #[test]
    fn test_same_value_emits_nothing() {
        let store = ConfigStore::with_defaults();
        let mut events = store.subscribe();

        assert!(!store.set("version", "0.0.0"));
        assert!(!store.set("aliases", Vec::<String>::new()));
        assert!(!store.set("max age", "30 days"));
        assert!(events.try_next().is_none());
    }

    #[test]
    fn test_suppressed_set() {
        let store = ConfigStore::with_defaults();
        let mut events = store.subscribe();

        assert!(store.set_with("version", "1.0.0", false));
        assert_eq!(store.get_str("version").as_deref(), Some("1.0.0"));
        assert!(events.try_next().is_none());
    }

    #[test]
    fn test_list_merge_on_set() {
        let store = ConfigStore::with_defaults();
        store.set("aliases", vec!["//a.cdn"]);
        store.set("aliases", vec!["//b.cdn", "//a.cdn"]);
        store.set("aliases", "//c.cdn");
        assert_eq!(
            store.get_strings("aliases"),
            vec!["//a.cdn", "//b.cdn", "//c.cdn"]
        );
    }

    #[test]
    fn test_apply_synced_is_idempotent() {
        let store = ConfigStore::with_defaults();
        let mut events = store.subscribe();

        assert!(store.apply_synced("version", "2.0.0"));
        match events.try_next() {
            Some(ConfigEvent::Sync { key, value, previous }) => {
                assert_eq!(key, "version");
                assert_eq!(value, ConfigValue::from("2.0.0"));
                assert_eq!(previous, Some(ConfigValue::from("0.0.0")));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.try_next().is_none());

        assert!(!store.apply_synced("version", "2.0.0"));
        assert!(events.try_next().is_none());
    }

    #[test]
    fn test_fork_is_independent() {
        let store = ConfigStore::with_defaults();
        let copy = store.fork();

        copy.set("version", "9.9.9");
        assert_eq!(store.get_str("version").as_deref(), Some("0.0.0"));
        assert_eq!(copy.get_str("version").as_deref(), Some("9.9.9"));
    }
}
