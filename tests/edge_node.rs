//! Request pipeline tests against a live origin server

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use versions::{ConfigStore, EdgeNode};

const STYLESHEET: &str = "body { color: #333; margin: 0 auto; padding: 0 }\n";

async fn spawn_origin(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn stylesheet(State(hits): State<Arc<AtomicUsize>>) -> impl axum::response::IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    (
        [
            (header::CONTENT_TYPE, "text/css"),
            (header::LAST_MODIFIED, "Wed, 21 Oct 2015 07:28:00 GMT"),
        ],
        STYLESHEET,
    )
}

struct Fixture {
    node: EdgeNode,
    router: Router,
    hits: Arc<AtomicUsize>,
}

async fn fixture() -> Fixture {
    let hits = Arc::new(AtomicUsize::new(0));
    let origin = spawn_origin(
        Router::new()
            .route("/css/site.css", get(stylesheet))
            .route("/noext", get(stylesheet))
            .route("/secret.php", get(stylesheet))
            .with_state(hits.clone()),
    )
    .await;

    let store = ConfigStore::with_defaults();
    store.set("origin servers", json!([{ "url": origin, "id": "home" }]));
    store.set("blacklisted extensions", vec![".php"]);
    store.set("auth", "s3cret");

    let node = EdgeNode::new(Arc::new(store)).unwrap();
    let router = node.router();
    Fixture { node, router, hits }
}

async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

async fn get_path(router: &Router, uri: &str) -> Response<Body> {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_pull_then_hit() {
    let f = fixture().await;

    let first = get_path(&f.router, "/versions:1.0.0/css/site.css").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache"], "Pull");
    assert_eq!(first.headers()[header::CONTENT_TYPE], "text/css");
    assert_eq!(
        first.headers()[header::LAST_MODIFIED],
        "Wed, 21 Oct 2015 07:28:00 GMT"
    );
    assert_eq!(first.headers()[header::VARY], "Accept-Encoding");
    assert!(first.headers()["x-powered-by"]
        .to_str()
        .unwrap()
        .starts_with("Versions/"));
    assert_eq!(first.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(body_bytes(first).await, STYLESHEET.as_bytes());

    let second = get_path(&f.router, "/versions:1.0.0/css/site.css").await;
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(body_bytes(second).await, STYLESHEET.as_bytes());

    assert_eq!(f.hits.load(Ordering::SeqCst), 1);
    assert!(f.node.cache().has("1.0.0#/css/site.css"));
    assert_eq!(f.node.metrics().get("cache hit"), 1);
    assert_eq!(f.node.metrics().get("versioned"), 2);
}

#[tokio::test]
async fn test_versions_share_nothing() {
    let f = fixture().await;

    get_path(&f.router, "/versions:1.0.0/css/site.css").await;
    let other = get_path(&f.router, "/versions:1.0.1/css/site.css").await;
    assert_eq!(other.headers()["x-cache"], "Pull");
    assert_eq!(f.hits.load(Ordering::SeqCst), 2);

    // Untagged requests cache under the empty tag
    get_path(&f.router, "/css/site.css").await;
    assert!(f.node.cache().has("#/css/site.css"));
}

#[tokio::test]
async fn test_conditional_request_short_circuits() {
    let f = fixture().await;

    let request = Request::get("/css/site.css")
        .header(header::IF_MODIFIED_SINCE, "Wed, 21 Oct 2015 07:28:00 GMT")
        .body(Body::empty())
        .unwrap();
    let response = send(&f.router, request).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()["x-cache"], "304");
    assert!(response.headers().contains_key(header::EXPIRES));
    assert!(!response.headers().contains_key(header::VARY));
    assert_eq!(f.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_asset_is_404() {
    let f = fixture().await;

    let response = get_path(&f.router, "/versions:2/js/missing.js").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.starts_with("/* 404: File Not Found. Served by: Versions/"));

    // A failed pull leaves nothing behind
    assert!(f.node.cache().is_empty());
    assert_eq!(f.node.metrics().get("404"), 1);
}

#[tokio::test]
async fn test_extension_policy() {
    let f = fixture().await;

    let bare = get_path(&f.router, "/noext").await;
    assert_eq!(bare.status(), StatusCode::NOT_FOUND);

    let blocked = get_path(&f.router, "/secret.php").await;
    assert_eq!(blocked.status(), StatusCode::NOT_FOUND);

    assert_eq!(f.hits.load(Ordering::SeqCst), 0);

    f.node.store().set("force extensions", false);
    let allowed = get_path(&f.router, "/noext").await;
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_head_has_headers_only() {
    let f = fixture().await;

    let request = Request::builder()
        .method(Method::HEAD)
        .uri("/css/site.css")
        .body(Body::empty())
        .unwrap();
    let response = send(&f.router, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        STYLESHEET.len().to_string().as_str()
    );
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_gzip_variant_served() {
    let f = fixture().await;

    let request = Request::get("/css/site.css")
        .header(header::ACCEPT_ENCODING, "gzip, deflate")
        .body(Body::empty())
        .unwrap();
    let response = send(&f.router, request).await;

    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    let compressed = body_bytes(response).await;
    let mut decoded = String::new();
    flate2::read::GzDecoder::new(&compressed[..])
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, STYLESHEET);
    assert_eq!(f.node.metrics().get("gzip"), 1);
}

#[tokio::test]
async fn test_origin_hint() {
    let f = fixture().await;

    let pinned = get_path(&f.router, "/id:home/css/site.css").await;
    assert_eq!(pinned.status(), StatusCode::OK);

    let unknown = get_path(&f.router, "/id:elsewhere/css/site.css").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(f.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_admin_hidden_without_token() {
    let f = fixture().await;

    for uri in ["/flush", "/keys?auth=wrong", "/metrics"] {
        let response = get_path(&f.router, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        assert!(String::from_utf8(body_bytes(response).await)
            .unwrap()
            .contains("404: File Not Found"));
    }

    f.node.store().set("auth", "");
    let response = get_path(&f.router, "/keys?auth=").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes() {
    let f = fixture().await;
    get_path(&f.router, "/versions:1.0.0/css/site.css").await;

    let keys = body_json(get_path(&f.router, "/keys?auth=s3cret").await).await;
    assert_eq!(keys, json!({ "keys": ["1.0.0#/css/site.css"] }));

    let inspect = body_json(get_path(&f.router, "/inspect?auth=s3cret&key=site.css").await).await;
    assert_eq!(inspect["key"], "1.0.0#/css/site.css");
    assert_eq!(inspect["data"]["Content-Length"], STYLESHEET.len());
    assert_eq!(inspect["data"]["Content-Type"], "text/css");
    assert!(inspect["data"]["Content-Length GZIP"].is_u64());

    let missing = body_json(get_path(&f.router, "/inspect?auth=s3cret&key=nope").await).await;
    assert_eq!(
        missing,
        json!({ "inspect": "Failed to find the requested key file in cache" })
    );

    let expire = body_json(get_path(&f.router, "/expire?auth=s3cret&key=site").await).await;
    assert_eq!(expire, json!({ "expire": "OK", "expired": 1 }));
    assert!(f.node.cache().is_empty());

    get_path(&f.router, "/css/site.css").await;
    let flush = body_json(get_path(&f.router, "/flush?auth=s3cret").await).await;
    assert_eq!(flush, json!({ "flush": "OK" }));
    assert!(f.node.cache().is_empty());

    let metrics = body_json(get_path(&f.router, "/metrics?auth=s3cret").await).await;
    assert!(metrics["requests"].as_u64().unwrap() >= 1);
    assert!(metrics["uptime"].is_u64());
    assert!(metrics["cache size"].as_str().unwrap().ends_with("kb"));

    let prometheus = get_path(&f.router, "/metrics?auth=s3cret&format=prometheus").await;
    let text = String::from_utf8(body_bytes(prometheus).await).unwrap();
    assert!(text.contains("versions_events_total"));
}

#[tokio::test]
async fn test_admin_version_and_sync() {
    let f = fixture().await;

    let request = Request::put("/version?auth=s3cret")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"version":"2.0.0"}"#))
        .unwrap();
    let updated = body_json(send(&f.router, request).await).await;
    assert_eq!(updated, json!({ "version": "2.0.0" }));

    let current = body_json(get_path(&f.router, "/version?auth=s3cret").await).await;
    assert_eq!(current, json!({ "version": "2.0.0" }));

    let request = Request::put("/sync?auth=s3cret")
        .body(Body::from(r#"{"aliases":["//cdn-1.local"]}"#))
        .unwrap();
    let synced = body_json(send(&f.router, request).await).await;
    assert_eq!(synced, json!({ "aliases": ["//cdn-1.local"] }));

    let all = body_json(get_path(&f.router, "/sync?auth=s3cret").await).await;
    assert_eq!(all["version"], "2.0.0");

    let unknown = get_path(&f.router, "/sync?auth=s3cret&key=cors").await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(unknown).await["error"].is_string());

    let request = Request::put("/sync?auth=s3cret")
        .body(Body::from(r#"{"port":1}"#))
        .unwrap();
    assert_eq!(send(&f.router, request).await.status(), StatusCode::BAD_REQUEST);

    let request = Request::put("/version?auth=s3cret")
        .body(Body::from("not json"))
        .unwrap();
    assert_eq!(send(&f.router, request).await.status(), StatusCode::BAD_REQUEST);

    let missing = get_path(&f.router, "/expire?auth=s3cret").await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_listen_and_end() {
    let mut f = fixture().await;
    let addr = f.node.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let response = reqwest::get(format!("http://{}/versions:9/css/site.css", addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["x-cache"], "Pull");

    f.node.end().await;
    assert!(f.node.cache().is_empty());
}
