//! HTTP surface of an edge node
//!
//! Every request runs the same pipeline through one fallback handler:
//!
//! ```text
//! initialize -> versioning -> conditional -> memorize -> admin -> pull -> 404
//! ```
//!
//! Each stage either answers or hands the request on.

use super::admin;
use super::fetch::Fetcher;
use super::negotiate::{Capability, ContentNegotiator, RequestInfo};
use super::respond;
use crate::cache::{cache_key, ArtifactCache};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::MetricsRegistry;
use crate::store::{keys, ConfigStore};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, Response, StatusCode},
    middleware::{self, Next},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Prefix that carries the version tag in a URL
pub const VERSION_PREFIX: &str = "/versions:";

/// Nothing this surface accepts comes close
const MAX_REQUEST_BODY: usize = 1024 * 1024;

#[derive(Clone)]
pub struct EdgeState {
    pub store: Arc<ConfigStore>,
    pub cache: ArtifactCache,
    pub fetcher: Fetcher,
    pub negotiator: ContentNegotiator,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn create_router(state: EdgeState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), initialize))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            request_tracing_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY))
        .with_state(state)
}

/// `/versions:<tag>/rest` -> (`<tag>`, `/rest`); other paths get the empty tag
pub fn strip_version_prefix(path: &str) -> (Option<&str>, &str) {
    let prefix_len = VERSION_PREFIX.len();
    let matches = path
        .get(..prefix_len)
        .is_some_and(|head| head.eq_ignore_ascii_case(VERSION_PREFIX));
    if !matches {
        return (None, path);
    }

    let rest = &path[prefix_len..];
    match rest.find('/') {
        Some(idx) => (Some(&rest[..idx]), &rest[idx..]),
        None => (Some(rest), "/"),
    }
}

/// Headers every response carries
async fn initialize(
    State(state): State<EdgeState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    state.metrics.incr("requests");
    let mut response = next.run(request).await;

    let cors = state
        .store
        .get_str(keys::CORS)
        .unwrap_or_else(|| "*".to_string());
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("Versions/{}", crate::VERSION)) {
        headers.insert(header::HeaderName::from_static("x-powered-by"), value);
    }
    if let Ok(value) = HeaderValue::from_str(&cors) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    if response.status() != StatusCode::NOT_MODIFIED {
        response
            .headers_mut()
            .insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }

    response
}

async fn dispatch(State(state): State<EdgeState>, request: Request<Body>) -> Response<Body> {
    let (parts, body) = request.into_parts();

    let (tag, path) = strip_version_prefix(parts.uri.path());
    if tag.is_some() {
        state.metrics.incr("versioned");
    }
    let tag = tag.unwrap_or_default();

    let info = RequestInfo {
        method: &parts.method,
        path,
        headers: &parts.headers,
    };

    if state.negotiator.allows(Capability::NotModified, &info) {
        state.metrics.incr("304");
        return respond::not_modified(&state.store);
    }

    let readable = parts.method == Method::GET || parts.method == Method::HEAD;
    let key = cache_key(tag, path);

    if readable && !parts.headers.contains_key(header::RANGE) {
        if let Some(artifact) = state.cache.get(&key) {
            state.metrics.incr("cache hit");
            return respond::write_artifact(
                &state.store,
                &state.metrics,
                &state.negotiator,
                &info,
                &artifact,
                "HIT",
            );
        }
    }

    if let Some(response) = admin::handle(&state, &parts, body).await {
        return response;
    }

    if readable {
        if let Some(artifact) = state.fetcher.pull(tag, &info).await {
            return respond::write_artifact(
                &state.store,
                &state.metrics,
                &state.negotiator,
                &info,
                &artifact,
                "Pull",
            );
        }
    }

    state.metrics.incr("404");
    respond::not_found()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_version_prefix() {
        assert_eq!(
            strip_version_prefix("/versions:1.0.2/css/a.css"),
            (Some("1.0.2"), "/css/a.css")
        );
        assert_eq!(
            strip_version_prefix("/VERSIONS:abc/a.js"),
            (Some("abc"), "/a.js")
        );
        assert_eq!(strip_version_prefix("/versions:1.0"), (Some("1.0"), "/"));
        assert_eq!(strip_version_prefix("/css/a.css"), (None, "/css/a.css"));
        assert_eq!(strip_version_prefix("/v"), (None, "/v"));
    }
}
