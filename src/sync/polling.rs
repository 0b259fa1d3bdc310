//! HTTP-polling replication of the version, used when no broker is configured

use super::SyncHandle;
use crate::common::{absolute_url, Error, Result};
use crate::store::{keys, ConfigStore};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct VersionBody {
    version: Option<serde_json::Value>,
}

/// `<server>/version`, with the admin token when the store has one
pub fn version_url(store: &ConfigStore, server: &str) -> String {
    let mut url = absolute_url(&format!("{}/version", server.trim_end_matches('/')));
    if let Some(auth) = store.get_str(keys::AUTH).filter(|a| !a.is_empty()) {
        url.push_str("?auth=");
        url.push_str(&utf8_percent_encode(&auth, NON_ALPHANUMERIC).to_string());
    }
    url
}

/// Version string out of a `{"version": ..}` body
pub fn parse_version_body(body: &str) -> Result<String> {
    let parsed: VersionBody =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("version body: {}", e)))?;
    match parsed.version {
        Some(serde_json::Value::String(v)) if !v.is_empty() => Ok(v),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::Validation("response carries no version".into())),
    }
}

pub struct HttpPoller {
    store: Arc<ConfigStore>,
    http: reqwest::Client,
    url: String,
    /// `url` without the token, for logs and errors
    server: String,
    interval: Duration,
    destroyed: Arc<AtomicBool>,
}

impl HttpPoller {
    /// Poll `<server>/version` right away, then every `interval`, forever.
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    /// Must run inside a tokio runtime.
    pub fn start(store: Arc<ConfigStore>, server: &str, interval: Duration) -> Result<SyncHandle> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let destroyed = Arc::new(AtomicBool::new(false));
        let poller = Self {
            url: version_url(&store, server),
            server: server.to_string(),
            store,
            http,
            interval: interval.max(MIN_POLL_INTERVAL),
            destroyed: destroyed.clone(),
        };

        tracing::debug!(server = %poller.server, "polling for version changes");
        let task = tokio::spawn(poller.run());
        Ok(SyncHandle::new(destroyed, vec![task]))
    }

    async fn run(self) {
        loop {
            let outcome = self.poll().await;

            // Torn down while the request was in flight
            if self.destroyed.load(Ordering::SeqCst) {
                return;
            }

            match outcome {
                Ok(version) => {
                    if self.store.apply_synced(keys::VERSION, version.as_str()) {
                        tracing::info!(version = %version, "version synced from server");
                    }
                }
                Err(e) => tracing::warn!(server = %self.server, "version poll failed: {}", e),
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    async fn poll(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Err(Error::Upstream {
                url: self.server.clone(),
                reason: format!("status {}", status.as_u16()),
            });
        }
        parse_version_body(&response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_url() {
        let store = ConfigStore::with_defaults();
        assert_eq!(
            version_url(&store, "http://edge.local/"),
            "http://edge.local/version"
        );

        store.set("auth", "s3cr&t");
        assert_eq!(
            version_url(&store, "//edge.local"),
            "https://edge.local/version?auth=s3cr%26t"
        );
    }

    #[test]
    fn test_parse_version_body() {
        assert_eq!(parse_version_body(r#"{"version":"1.2.3"}"#).unwrap(), "1.2.3");
        assert_eq!(parse_version_body(r#"{"version":4}"#).unwrap(), "4");
        assert!(matches!(parse_version_body("nope"), Err(Error::Parse(_))));
        assert!(matches!(
            parse_version_body(r#"{"other":1}"#),
            Err(Error::Validation(_))
        ));
    }
}
