//! Token-gated admin routes
//!
//! Admin routes exist only when `auth` is configured and the request carries
//! a matching `?auth=` token. Any other request, including an unsupported
//! method on a known route, is declined with `None` so it continues down the
//! asset pipeline and ends exactly like an unknown path would.

use super::http::EdgeState;
use super::respond;
use crate::common::{Error, Result};
use crate::store::{keys, ConfigValue, SyncKey};
use axum::body::Body;
use axum::extract::Query;
use axum::http::{request::Parts, Method, Response, StatusCode};
use serde_json::json;
use std::collections::HashMap;

/// Admin payloads are small JSON documents
const MAX_ADMIN_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRoute {
    Version,
    Keys,
    Inspect,
    Flush,
    Expire,
    Metrics,
    Sync,
}

impl AdminRoute {
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/version" => Some(AdminRoute::Version),
            "/keys" => Some(AdminRoute::Keys),
            "/inspect" => Some(AdminRoute::Inspect),
            "/flush" => Some(AdminRoute::Flush),
            "/expire" => Some(AdminRoute::Expire),
            "/metrics" => Some(AdminRoute::Metrics),
            "/sync" => Some(AdminRoute::Sync),
            _ => None,
        }
    }

    pub fn supports(&self, method: &Method) -> bool {
        match self {
            AdminRoute::Version | AdminRoute::Sync => {
                *method == Method::GET || *method == Method::PUT
            }
            _ => *method == Method::GET,
        }
    }
}

/// Token check against the configured secret
pub fn authorized(state: &EdgeState, query: &HashMap<String, String>) -> bool {
    match state.store.get_str(keys::AUTH) {
        Some(secret) if !secret.is_empty() => query.get("auth") == Some(&secret),
        _ => false,
    }
}

/// Serve an admin request, or decline with `None`
pub async fn handle(state: &EdgeState, parts: &Parts, body: Body) -> Option<Response<Body>> {
    let route = AdminRoute::from_path(parts.uri.path())?;
    if !route.supports(&parts.method) {
        return None;
    }

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    if !authorized(state, &query) {
        tracing::debug!(path = %parts.uri.path(), "admin request declined");
        return None;
    }

    let outcome = match (route, parts.method == Method::PUT) {
        (AdminRoute::Version, false) => Ok(version(state)),
        (AdminRoute::Version, true) => match read_json(body).await {
            Ok(payload) => set_version(state, payload),
            Err(e) => Err(e),
        },
        (AdminRoute::Keys, _) => Ok(list_keys(state)),
        (AdminRoute::Inspect, _) => inspect(state, &query),
        (AdminRoute::Flush, _) => Ok(flush(state)),
        (AdminRoute::Expire, _) => expire(state, &query),
        (AdminRoute::Metrics, _) => return Some(metrics(state, &query)),
        (AdminRoute::Sync, false) => read_sync(state, &query),
        (AdminRoute::Sync, true) => match read_json(body).await {
            Ok(payload) => write_sync(state, payload),
            Err(e) => Err(e),
        },
    };

    Some(match outcome {
        Ok(value) => respond::json(StatusCode::OK, value),
        Err(e) => {
            tracing::error!(path = %parts.uri.path(), "admin request rejected: {}", e);
            respond::json(e.to_http_status(), json!({ "error": e.to_string() }))
        }
    })
}

async fn read_json(body: Body) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(body, MAX_ADMIN_BODY)
        .await
        .map_err(|e| Error::Validation(format!("unreadable body: {}", e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn version(state: &EdgeState) -> serde_json::Value {
    json!({ "version": state.store.get_str(keys::VERSION) })
}

fn set_version(state: &EdgeState, payload: serde_json::Value) -> Result<serde_json::Value> {
    let next = match payload.get("version") {
        Some(serde_json::Value::String(v)) => v.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(Error::Validation("missing version".into())),
    };

    if state.store.set(keys::VERSION, next.as_str()) {
        tracing::info!(version = %next, "version updated");
    }
    Ok(version(state))
}

fn list_keys(state: &EdgeState) -> serde_json::Value {
    state.metrics.incr("keys");
    json!({ "keys": state.cache.keys() })
}

fn required<'a>(query: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    query
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("missing `{}` query parameter", name)))
}

fn inspect(state: &EdgeState, query: &HashMap<String, String>) -> Result<serde_json::Value> {
    state.metrics.incr("inspect");
    let pattern = required(query, "key")?;

    let mut found = None;
    for key in state.cache.keys() {
        if !key.contains(pattern) {
            continue;
        }
        if let Some(artifact) = state.cache.get(&key) {
            found = Some(json!({
                "key": key,
                "data": {
                    "Content-Length": artifact.body.len(),
                    "Content-Length GZIP": artifact.variant(crate::cache::Encoding::Gzip).map(|b| b.len()),
                    "Content-Length Deflate": artifact.variant(crate::cache::Encoding::Deflate).map(|b| b.len()),
                    "Content-Type": artifact.content_type,
                    "Last-Modified": artifact.last_modified,
                }
            }));
            break;
        }
    }

    Ok(found.unwrap_or_else(
        || json!({ "inspect": "Failed to find the requested key file in cache" }),
    ))
}

fn flush(state: &EdgeState) -> serde_json::Value {
    state.metrics.incr("flush");
    state.cache.destroy();
    state.cache.start();
    tracing::info!("artifact cache flushed");
    json!({ "flush": "OK" })
}

fn expire(state: &EdgeState, query: &HashMap<String, String>) -> Result<serde_json::Value> {
    state.metrics.incr("expire");
    let pattern = required(query, "key")?;
    let expired = state.cache.remove_matching(pattern);
    tracing::info!(pattern = %pattern, expired, "artifacts expired");
    Ok(json!({ "expire": "OK", "expired": expired }))
}

fn metrics(state: &EdgeState, query: &HashMap<String, String>) -> Response<Body> {
    state.metrics.incr("metrics");
    let size = state.cache.size_bytes();
    if query.get("format").map(String::as_str) == Some("prometheus") {
        respond::text(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            state.metrics.to_prometheus(size),
        )
    } else {
        respond::json(StatusCode::OK, state.metrics.to_json(size))
    }
}

fn curated(state: &EdgeState, selected: &[SyncKey]) -> serde_json::Value {
    serde_json::Value::Object(
        selected
            .iter()
            .map(|key| {
                let value = state
                    .store
                    .get(key.as_str())
                    .map(|v| v.to_json())
                    .unwrap_or(serde_json::Value::Null);
                (key.to_string(), value)
            })
            .collect(),
    )
}

fn read_sync(state: &EdgeState, query: &HashMap<String, String>) -> Result<serde_json::Value> {
    match query.get("key") {
        Some(name) => {
            let key = SyncKey::parse(name)
                .ok_or_else(|| Error::Validation(format!("unknown sync key: {}", name)))?;
            Ok(curated(state, &[key]))
        }
        None => Ok(curated(state, &SyncKey::ALL)),
    }
}

fn write_sync(state: &EdgeState, payload: serde_json::Value) -> Result<serde_json::Value> {
    let serde_json::Value::Object(entries) = payload else {
        return Err(Error::Validation("expected a JSON object".into()));
    };

    let mut updates = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        let key = SyncKey::parse(&name)
            .ok_or_else(|| Error::Validation(format!("unknown sync key: {}", name)))?;
        updates.push((key, ConfigValue::from(value)));
    }

    let touched: Vec<SyncKey> = updates.iter().map(|(key, _)| *key).collect();
    for (key, value) in updates {
        state.store.set(key.as_str(), value);
    }
    Ok(curated(state, &touched))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_schema() {
        assert_eq!(AdminRoute::from_path("/flush"), Some(AdminRoute::Flush));
        assert_eq!(AdminRoute::from_path("/sync/"), Some(AdminRoute::Sync));
        assert_eq!(AdminRoute::from_path("/flushes"), None);

        assert!(AdminRoute::Version.supports(&Method::PUT));
        assert!(!AdminRoute::Flush.supports(&Method::PUT));
        assert!(!AdminRoute::Keys.supports(&Method::POST));
    }
}
