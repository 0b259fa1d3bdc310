//! Configuration loading for versions nodes and clients
//!
//! Sources, lowest priority first:
//! 1. built-in defaults ([`ConfigStore::with_defaults`])
//! 2. a TOML file (`versions.toml`, or the path in `VERSIONS_CONFIG`)
//! 3. `VERSIONS_*` environment variables (`VERSIONS_MAX_AGE=1h` -> `max age`)
//!
//! Every loaded key goes through [`ConfigStore::set`], so merge rules and
//! duration conversion apply to file input as well.

use crate::common::Result;
use crate::store::{keys, ConfigStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "versions.toml";
pub const CONFIG_PATH_ENV: &str = "VERSIONS_CONFIG";
pub const ENV_PREFIX: &str = "VERSIONS";

/// Environment keys read as comma-separated lists
const LIST_KEYS: [&str; 3] = ["aliases", "blacklisted_extensions", "origin_servers"];

/// Resolve which config file to read
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Read file and environment sources into a flat key map.
///
/// A missing file is not an error.
pub fn read_sources(path: &Path) -> Result<BTreeMap<String, serde_json::Value>> {
    read_sources_from(path, None)
}

/// [`read_sources`] with an explicit variable map in place of the process
/// environment
pub fn read_sources_from(
    path: &Path,
    vars: Option<config::Map<String, String>>,
) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut env = environment(vars.clone())
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(env)
        .build()?;

    // Unparsed copy of the environment, so text keys keep their exact spelling
    let verbatim: BTreeMap<String, serde_json::Value> = config::Config::builder()
        .add_source(environment(vars))
        .build()?
        .try_deserialize()?;
    let verbatim: BTreeMap<String, serde_json::Value> = verbatim
        .into_iter()
        .map(|(key, value)| (normalize_key(&key), value))
        .collect();

    let raw: BTreeMap<String, serde_json::Value> = settings.try_deserialize()?;
    Ok(raw
        .into_iter()
        .filter(|(key, _)| key != "config")
        .map(|(key, value)| {
            let key = normalize_key(&key);
            if !keys::is_string_key(&key) {
                return (key, value);
            }
            let value = match verbatim.get(&key) {
                Some(text @ serde_json::Value::String(_)) => text.clone(),
                _ => as_text(value),
            };
            (key, value)
        })
        .collect())
}

fn environment(vars: Option<config::Map<String, String>>) -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .source(vars)
}

/// `version = 2` in a file still means the text "2"
fn as_text(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Number(n) => serde_json::Value::String(n.to_string()),
        serde_json::Value::Bool(b) => serde_json::Value::String(b.to_string()),
        other => other,
    }
}

/// Load configuration into a store. Returns the number of keys that changed.
pub fn load(store: &ConfigStore, path: Option<&Path>) -> Result<usize> {
    let path = config_path(path);
    let values = read_sources(&path)?;
    Ok(apply(store, &path, values))
}

fn apply(store: &ConfigStore, path: &Path, values: BTreeMap<String, serde_json::Value>) -> usize {
    let mut changed = 0;
    for (key, value) in values {
        if store.set(&key, value) {
            changed += 1;
        }
    }

    tracing::info!(path = %path.display(), changed, "configuration loaded");
    changed
}

/// `max_age` and `MAX AGE` both address `max age`
fn normalize_key(key: &str) -> String {
    key.trim().replace('_', " ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn temp_config(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("max_age"), "max age");
        assert_eq!(normalize_key("Expire Internal Cache"), "expire internal cache");
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        let store = ConfigStore::with_defaults();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        load(&store, Some(&path)).unwrap();
        assert_eq!(store.get_str("version").as_deref(), Some("0.0.0"));
    }

    #[test]
    fn test_load_toml_file() {
        let file = temp_config(
            r#"
"max age" = "1h"
version = "1.2.3"
aliases = ["//a.cdn", "//b.cdn"]

[[ "origin servers" ]]
url = "http://origin.local"
id = "home"
"#,
        );

        let store = ConfigStore::with_defaults();
        let changed = load(&store, Some(file.path())).unwrap();

        assert!(changed >= 4);
        assert_eq!(store.get_duration("max age"), Some(Duration::from_secs(3600)));
        assert_eq!(store.get_str("version").as_deref(), Some("1.2.3"));
        assert_eq!(store.get_strings("aliases"), vec!["//a.cdn", "//b.cdn"]);

        let origins = store.get("origin servers").unwrap();
        let first = &origins.as_list().unwrap()[0];
        assert_eq!(
            first.as_map().unwrap()["url"].as_str(),
            Some("http://origin.local")
        );
    }

    #[test]
    fn test_numeric_text_keys_stay_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let vars: config::Map<String, String> = [
            ("VERSIONS_AUTH", "12345"),
            ("VERSIONS_VERSION", "2.10"),
            ("VERSIONS_PORT", "9090"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let store = ConfigStore::with_defaults();
        apply(&store, &path, read_sources_from(&path, Some(vars)).unwrap());

        assert_eq!(store.get_str("auth").as_deref(), Some("12345"));
        assert_eq!(store.get_str("version").as_deref(), Some("2.10"));
        assert_eq!(store.get_u64("port"), Some(9090));
    }

    #[test]
    fn test_numeric_version_in_file_is_text() {
        let file = temp_config("version = 2\nauth = 777\nport = 8181\n");
        let store = ConfigStore::with_defaults();
        let values = read_sources_from(file.path(), Some(config::Map::new())).unwrap();
        apply(&store, file.path(), values);

        assert_eq!(store.get_str("version").as_deref(), Some("2"));
        assert_eq!(store.get_str("auth").as_deref(), Some("777"));
        assert_eq!(store.get_u64("port"), Some(8181));
    }
}
