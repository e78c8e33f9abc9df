//! `HttpRegistry` against a local axum registry.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use npmirror_core::pkg::integrity::{sri, Algorithm};
use npmirror_core::pkg::{
    mirror_codes, DependencyKind, DependencySpec, HttpRegistry, Mirror, Registry,
};
use npmirror_core::{MirrorConfig, RetryPolicy};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Upstream {
    base_url: String,
    flaky_hits: AtomicUsize,
    required_token: Option<String>,
}

fn authorized(upstream: &Upstream, headers: &HeaderMap) -> bool {
    match &upstream.required_token {
        None => true,
        Some(token) => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {token}")),
    }
}

fn tgz(name: &str, version: &str) -> Vec<u8> {
    format!("{name}-{version}").into_bytes()
}

async fn packument(
    State(upstream): State<Arc<Upstream>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if !authorized(&upstream, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let doc = match name.as_str() {
        "left-pad" => json!({
            "name": "left-pad",
            "dist-tags": { "latest": "1.3.0" },
            "versions": {
                "1.3.0": {
                    "version": "1.3.0",
                    "dependencies": { "@scope/pad": "^0.1.0" },
                    "dist": {
                        "tarball": format!("{}/left-pad/-/left-pad-1.3.0.tgz", upstream.base_url),
                        "integrity": sri(Algorithm::Sha512, &tgz("left-pad", "1.3.0")),
                    }
                }
            }
        }),
        "@scope/pad" => json!({
            "name": "@scope/pad",
            "dist-tags": { "latest": "0.1.2" },
            "versions": {
                "0.1.2": {
                    "version": "0.1.2",
                    "dist": {
                        "tarball": format!("{}/@scope/pad/-/pad-0.1.2.tgz", upstream.base_url),
                        "shasum": "0000000000000000000000000000000000000000",
                    }
                }
            }
        }),
        "flaky" => {
            if upstream.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            json!({ "name": "flaky", "versions": {} })
        }
        _ => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        doc.to_string(),
    )
        .into_response()
}

async fn tarball(
    State(upstream): State<Arc<Upstream>>,
    headers: HeaderMap,
    Path((name, file)): Path<(String, String)>,
) -> Response {
    if !authorized(&upstream, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let version = file
        .rsplit_once('-')
        .and_then(|(_, rest)| rest.strip_suffix(".tgz"))
        .unwrap_or_default();
    (StatusCode::OK, tgz(&name, version)).into_response()
}

async fn scoped_tarball(
    state: State<Arc<Upstream>>,
    headers: HeaderMap,
    Path((scope, name, file)): Path<(String, String, String)>,
) -> Response {
    tarball(state, headers, Path((format!("{scope}/{name}"), file))).await
}

async fn start(required_token: Option<&str>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let upstream = Arc::new(Upstream {
        base_url: base_url.clone(),
        flaky_hits: AtomicUsize::new(0),
        required_token: required_token.map(String::from),
    });
    let app = Router::new()
        .route("/:name", get(packument))
        .route("/:name/-/:file", get(tarball))
        .route("/:scope/:name/-/:file", get(scoped_tarball))
        .with_state(upstream);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base_url
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_metadata_and_scoped_encoding() {
    let base = start(None).await;
    let registry = HttpRegistry::new(&base).unwrap();

    let meta = registry.fetch_metadata("left-pad").await.unwrap();
    assert_eq!(meta.name, "left-pad");
    assert_eq!(meta.tagged("latest").unwrap().to_string(), "1.3.0");

    let scoped = registry.fetch_metadata("@scope/pad").await.unwrap();
    assert_eq!(scoped.name, "@scope/pad");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_mapping() {
    let base = start(None).await;
    let registry = HttpRegistry::new(&base).unwrap();

    let missing = registry.fetch_metadata("does-not-exist").await.unwrap_err();
    assert_eq!(missing.code(), mirror_codes::MIRROR_NOT_FOUND);

    let unavailable = registry.fetch_metadata("flaky").await.unwrap_err();
    assert_eq!(unavailable.code(), mirror_codes::MIRROR_NETWORK_ERROR);
    assert!(registry.fetch_metadata("flaky").await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tarball_size_limit() {
    let base = start(None).await;
    let registry = HttpRegistry::new(&base).unwrap().with_max_tarball_bytes(4);

    let url = format!("{base}/left-pad/-/left-pad-1.3.0.tgz");
    let err = registry.fetch_tarball(&url).await.unwrap_err();
    assert_eq!(err.code(), mirror_codes::MIRROR_IO_ERROR);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bearer_token_sent() {
    let base = start(Some("s3cret")).await;

    let anonymous = HttpRegistry::new(&base).unwrap();
    assert!(anonymous.fetch_metadata("left-pad").await.is_err());

    let authed = HttpRegistry::new(&base)
        .unwrap()
        .with_auth_token(Some("s3cret".to_string()));
    assert!(authed.fetch_metadata("left-pad").await.is_ok());
    let url = format!("{base}/left-pad/-/left-pad-1.3.0.tgz");
    assert_eq!(&authed.fetch_tarball(&url).await.unwrap()[..], b"left-pad-1.3.0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_run_over_http() {
    let base = start(None).await;
    let out = tempfile::tempdir().unwrap();
    let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(&base).unwrap());

    let config = MirrorConfig::new(out.path())
        .with_registry_url(&base)
        .with_concurrency(4)
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        });
    let seeds = vec![
        DependencySpec::new("left-pad", "^1.0.0", DependencyKind::Prod),
        DependencySpec::new("flaky", "*", DependencyKind::Dev),
    ];

    let report = Mirror::new(config, registry).run(seeds).await.unwrap();

    let resolved: Vec<_> = report.resolved.iter().map(ToString::to_string).collect();
    assert_eq!(resolved, ["@scope/pad@0.1.2", "left-pad@1.3.0"]);
    // flaky publishes no versions: one retry, then a range skip.
    assert_eq!(report.warnings.len(), 1);
    assert!(report.is_success(), "{:?}", report.failures);

    assert_eq!(
        std::fs::read(out.path().join("left-pad/-/left-pad-1.3.0.tgz")).unwrap(),
        b"left-pad-1.3.0"
    );
    assert_eq!(
        std::fs::read(out.path().join("@scope/pad/-/pad-0.1.2.tgz")).unwrap(),
        b"@scope/pad-0.1.2"
    );
    let index: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.path().join("left-pad/index.json")).unwrap()).unwrap();
    assert_eq!(index["name"], "left-pad");
}
