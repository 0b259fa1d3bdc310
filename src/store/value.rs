//! Tagged configuration values and their merge rules

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A configuration value.
///
/// `Scalar` holds any JSON value that is neither an array nor an object.
/// `Duration` is always milliseconds and only appears under duration keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum ConfigValue {
    Scalar(serde_json::Value),
    Duration(u64),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    /// Combine the current value with an incoming one.
    ///
    /// - list + list: union by value, no duplicates
    /// - list + scalar: scalar appended when absent
    /// - map + map: per-key overwrite, nested maps merged one level deep
    /// - anything else: the incoming value wins
    pub fn merge(&self, incoming: ConfigValue) -> ConfigValue {
        match (self, incoming) {
            (ConfigValue::List(current), ConfigValue::List(items)) => {
                let mut out = Vec::with_capacity(current.len() + items.len());
                for item in current.iter().cloned().chain(items) {
                    if !out.contains(&item) {
                        out.push(item);
                    }
                }
                ConfigValue::List(out)
            }
            (ConfigValue::List(current), scalar @ ConfigValue::Scalar(_)) => {
                let mut out = current.clone();
                if !out.contains(&scalar) {
                    out.push(scalar);
                }
                ConfigValue::List(out)
            }
            (ConfigValue::Map(current), ConfigValue::Map(incoming)) => {
                let mut out = current.clone();
                for (key, value) in incoming {
                    let merged = match (out.get(&key), value) {
                        (Some(ConfigValue::Map(nested)), ConfigValue::Map(update)) => {
                            let mut nested = nested.clone();
                            nested.extend(update);
                            ConfigValue::Map(nested)
                        }
                        (_, value) => value,
                    };
                    out.insert(key, merged);
                }
                ConfigValue::Map(out)
            }
            (_, incoming) => incoming,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Scalar(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Scalar(serde_json::Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ConfigValue::Scalar(serde_json::Value::Number(n)) => n.as_u64(),
            ConfigValue::Scalar(serde_json::Value::String(s)) => s.trim().parse().ok(),
            ConfigValue::Duration(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ConfigValue::Duration(ms) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// String members of a list, skipping anything else
    pub fn strings(&self) -> Vec<String> {
        self.as_list()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Scalar(serde_json::Value::Null))
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.clone().into()
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
            }
            serde_json::Value::Object(map) => ConfigValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
            scalar => ConfigValue::Scalar(scalar),
        }
    }
}

impl From<ConfigValue> for serde_json::Value {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Scalar(v) => v,
            ConfigValue::Duration(ms) => serde_json::Value::from(ms),
            ConfigValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            ConfigValue::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Scalar(s.into())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::Scalar(s.into())
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Scalar(b.into())
    }
}

impl From<u64> for ConfigValue {
    fn from(n: u64) -> Self {
        ConfigValue::Scalar(n.into())
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        ConfigValue::Scalar(n.into())
    }
}

impl From<Duration> for ConfigValue {
    fn from(d: Duration) -> Self {
        ConfigValue::Duration(d.as_millis() as u64)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(items: Vec<String>) -> Self {
        ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
    }
}

impl From<Vec<&str>> for ConfigValue {
    fn from(items: Vec<&str>) -> Self {
        ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
    }
}
