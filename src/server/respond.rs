//! Response writers for artifacts, 304s and the 404 fall-through

use super::negotiate::{Capability, ContentNegotiator, RequestInfo};
use crate::cache::{Artifact, Encoding};
use crate::common::{http_date, MetricsRegistry};
use crate::store::{keys, ConfigStore};
use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Response, StatusCode};
use std::time::Duration;

pub const X_CACHE: &str = "X-Cache";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Config-driven cache lifetime for served assets
fn max_age(store: &ConfigStore) -> Duration {
    store.get_duration(keys::MAX_AGE).unwrap_or_default()
}

fn expires(store: &ConfigStore) -> String {
    let age = chrono::Duration::from_std(max_age(store)).unwrap_or_else(|_| chrono::Duration::zero());
    http_date(chrono::Utc::now() + age)
}

fn insert(response: &mut Response<Body>, name: impl header::IntoHeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

/// Pick the variant to send. gzip wins when both are acceptable.
pub fn select_encoding(
    negotiator: &ContentNegotiator,
    request: &RequestInfo<'_>,
    artifact: &Artifact,
) -> Option<Encoding> {
    let mut chosen = None;
    if artifact.variant(Encoding::Deflate).is_some()
        && negotiator.allows(Capability::Deflate, request)
    {
        chosen = Some(Encoding::Deflate);
    }
    if artifact.variant(Encoding::Gzip).is_some() && negotiator.allows(Capability::Gzip, request) {
        chosen = Some(Encoding::Gzip);
    }
    chosen
}

/// Serve an artifact with cache headers. `source` fills `X-Cache`.
pub fn write_artifact(
    store: &ConfigStore,
    metrics: &MetricsRegistry,
    negotiator: &ContentNegotiator,
    request: &RequestInfo<'_>,
    artifact: &Artifact,
    source: &str,
) -> Response<Body> {
    let mut body = artifact.body.clone();
    let mut encoding = None;

    if !artifact.compressed.is_empty() {
        match select_encoding(negotiator, request, artifact) {
            Some(chosen) => {
                if let Some(variant) = artifact.variant(chosen) {
                    body = variant.clone();
                    encoding = Some(chosen);
                    metrics.incr(chosen.as_str());
                }
            }
            None => metrics.incr("compression blocked"),
        }
    }

    let length = body.len();
    let body = if *request.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    insert(&mut response, header::EXPIRES, &expires(store));
    insert(
        &mut response,
        header::CACHE_CONTROL,
        &format!("max-age={}, public", max_age(store).as_secs()),
    );
    if let Some(last_modified) = &artifact.last_modified {
        insert(&mut response, header::LAST_MODIFIED, last_modified);
    }
    insert(
        &mut response,
        header::CONTENT_TYPE,
        artifact.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
    );
    insert(&mut response, header::CONTENT_LENGTH, &length.to_string());
    if let Some(encoding) = encoding {
        insert(&mut response, header::CONTENT_ENCODING, encoding.as_str());
    }
    insert(&mut response, X_CACHE, source);

    response
}

pub fn not_modified(store: &ConfigStore) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    insert(&mut response, header::EXPIRES, &expires(store));
    insert(&mut response, X_CACHE, "304");
    response
}

pub fn not_found() -> Response<Body> {
    let mut response = Response::new(Body::from(format!(
        "/* 404: File Not Found. Served by: Versions/{} */",
        crate::VERSION
    )));
    *response.status_mut() = StatusCode::NOT_FOUND;
    insert(&mut response, header::CONTENT_TYPE, "text/plain");
    response
}

pub fn json(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    insert(&mut response, header::CONTENT_TYPE, "application/json");
    response
}

pub fn text(status: StatusCode, content_type: &str, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    insert(&mut response, header::CONTENT_TYPE, content_type);
    response
}
