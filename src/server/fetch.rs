//! Multi-origin pull with ordered failover

use super::negotiate::{Capability, ContentNegotiator, RequestInfo};
use crate::cache::{cache_key, compress, Artifact, ArtifactCache};
use crate::common::{failover, Error, MetricsRegistry, Result};
use crate::store::{keys, ConfigStore, ConfigValue};
use axum::http::header;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Path segment that pins a request to one origin: `/id:<origin id>/...`
pub const ORIGIN_HINT: &str = "/id:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginServer {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl OriginServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// `{"url": .., "id": ..}` or a bare url string
    pub fn from_config(value: &ConfigValue) -> Option<Self> {
        if let Some(url) = value.as_str() {
            return Some(Self::new(url));
        }
        serde_json::from_value(value.to_json()).ok()
    }

    /// `<url>` or `<url>=<id>`
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once('=') {
            Some((url, id)) if !id.is_empty() && !id.contains('/') => Self::new(url).with_id(id),
            _ => Self::new(raw),
        }
    }

    fn resource_url(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }
}

/// Configured origins, in failover order
pub fn origin_servers(store: &ConfigStore) -> Vec<OriginServer> {
    store
        .get(keys::ORIGIN_SERVERS)
        .and_then(|v| v.as_list().map(|items| items.to_vec()))
        .unwrap_or_default()
        .iter()
        .filter_map(OriginServer::from_config)
        .collect()
}

/// Split `/id:<id>/rest` into the origin id and `/rest`
pub fn split_origin_hint(path: &str) -> (Option<&str>, &str) {
    let Some(stripped) = path.strip_prefix(ORIGIN_HINT) else {
        return (None, path);
    };
    match stripped.find('/') {
        Some(idx) if idx > 0 => (Some(&stripped[..idx]), &stripped[idx..]),
        _ => (None, path),
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    store: Arc<ConfigStore>,
    cache: ArtifactCache,
    negotiator: ContentNegotiator,
    metrics: Arc<MetricsRegistry>,
}

impl Fetcher {
    pub fn new(
        store: Arc<ConfigStore>,
        cache: ArtifactCache,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            negotiator: ContentNegotiator::new(store.clone()),
            store,
            cache,
            metrics,
        })
    }

    /// Pull `request.path` from the origins and cache it under `tag`.
    ///
    /// `None` means nothing could be served: the extension is not allowed,
    /// no origin matches the hint, or every origin failed.
    pub async fn pull(&self, tag: &str, request: &RequestInfo<'_>) -> Option<Arc<Artifact>> {
        if !self.negotiator.allows(Capability::Extension, request) {
            return None;
        }

        let (hint, resource) = split_origin_hint(request.path);
        let candidates: Vec<String> = origin_servers(&self.store)
            .into_iter()
            .filter(|origin| hint.is_none() || origin.id.as_deref() == hint)
            .map(|origin| origin.resource_url(resource))
            .collect();

        if candidates.is_empty() {
            tracing::debug!(path = %request.path, "no origin server to pull from");
            return None;
        }

        let key = cache_key(tag, request.path);
        self.metrics.incr("origin server pull");
        // A second pull for the same key is tolerated; the last write wins
        self.cache.mark_pending(&key);

        let Some(draft) = failover(candidates, |url| self.attempt(url)).await else {
            tracing::warn!(path = %request.path, "every origin server failed");
            self.cache.clear_pending(&key);
            return None;
        };

        let variants = compress(
            draft.content_type.as_deref().unwrap_or_default(),
            draft.body.clone(),
        )
        .await;

        Some(self.cache.set(key, draft.with_variants(variants)))
    }

    async fn attempt(&self, url: String) -> Result<Artifact> {
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(Error::Upstream {
                url,
                reason: format!("status {}", status.as_u16()),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await?;
        tracing::debug!(url = %url, bytes = body.len(), "pulled from origin");

        let mut draft = Artifact::new(body);
        draft.content_type = content_type;
        draft.last_modified = last_modified;
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_origin_hint() {
        assert_eq!(
            split_origin_hint("/id:home/css/a.css"),
            (Some("home"), "/css/a.css")
        );
        assert_eq!(split_origin_hint("/css/a.css"), (None, "/css/a.css"));
        assert_eq!(split_origin_hint("/id:/a.css"), (None, "/id:/a.css"));
    }

    #[test]
    fn test_origin_parse() {
        assert_eq!(
            OriginServer::parse("http://origin.local=home"),
            OriginServer::new("http://origin.local").with_id("home")
        );
        assert_eq!(
            OriginServer::parse("http://origin.local/a?x=1/b"),
            OriginServer::new("http://origin.local/a?x=1/b")
        );
    }

    #[test]
    fn test_origin_servers_from_store() {
        let store = ConfigStore::with_defaults();
        store.set(
            "origin servers",
            json!([
                {"url": "http://a.local", "id": "a"},
                "http://b.local",
                {"no": "url"}
            ]),
        );

        let origins = origin_servers(&store);
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0].id.as_deref(), Some("a"));
        assert_eq!(origins[1].url, "http://b.local");
        assert_eq!(origins[1].resource_url("/x.js"), "http://b.local/x.js");
    }
}
