//! Integration tests for HttpBackend
//!
//! A small axum application stands in for the access-control backend and
//! records the requests it receives.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use turnkey_core::{AccessEvent, CardId, Direction};
use turnkey_network::{
    ArchiveFormat, Backend, HttpBackend, HttpBackendConfig, UpdateMetadata, UpdateStatus,
};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<(String, Value)>>>,
    headers: Arc<Mutex<Vec<(String, String)>>>,
}

impl Recorded {
    fn push(&self, route: &str, headers: &HeaderMap, body: Value) {
        self.bodies.lock().unwrap().push((route.to_string(), body));
        let auth = headers
            .get("authorization")
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let device = headers
            .get("x-device-id")
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        self.headers.lock().unwrap().push((auth, device));
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn start_with(app: Router, timeout: Duration, download_timeout: Duration) -> HttpBackend {
    let origin = serve(app).await;
    HttpBackend::new(HttpBackendConfig {
        base_url: format!("{origin}/api"),
        api_key: "test-key".to_string(),
        device_id: "turnstile_001".to_string(),
        timeout,
        download_timeout,
    })
    .unwrap()
}

async fn start(app: Router) -> HttpBackend {
    start_with(app, Duration::from_secs(2), Duration::from_secs(10)).await
}

/// File server that records the credentials it is sent.
fn mirror(recorded: Recorded, delay: Duration) -> Router {
    Router::new()
        .route(
            "/pkg/:id",
            get(
                move |State(rec): State<Recorded>, headers: HeaderMap, Path(id): Path<String>| async move {
                    rec.push(&format!("pkg:{id}"), &headers, Value::Null);
                    tokio::time::sleep(delay).await;
                    b"package".to_vec()
                },
            ),
        )
        .with_state(recorded)
}

fn app(recorded: Recorded) -> Router {
    Router::new()
        .route("/api/health", get(|| async { StatusCode::OK }))
        .route(
            "/api/access/check",
            post(
                |State(rec): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    let authorized = body["card_id"] == "123456789";
                    rec.push("check", &headers, body);
                    Json(json!({"authorized": authorized}))
                },
            ),
        )
        .route(
            "/api/access/sync",
            post(
                |State(rec): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    rec.push("sync", &headers, body);
                    StatusCode::OK
                },
            ),
        )
        .route(
            "/api/devices/:id/whitelist",
            get(|Path(id): Path<String>| async move {
                assert_eq!(id, "turnstile_001");
                Json(json!({"cards": ["123456789", "04A1B2C3", ""]}))
            }),
        )
        .route(
            "/api/updates/check",
            get(|| async {
                Json(json!({
                    "update_available": true,
                    "id": "u-7",
                    "version": "1.1.0",
                    "format": "zip",
                    "size": 5
                }))
            }),
        )
        .route(
            "/api/updates/:id/download",
            get(|State(rec): State<Recorded>, headers: HeaderMap| async move {
                rec.push("download", &headers, Value::Null);
                b"hello".to_vec()
            }),
        )
        .route(
            "/api/updates/:id/status",
            post(
                |State(rec): State<Recorded>,
                 headers: HeaderMap,
                 Path(id): Path<String>,
                 Json(body): Json<Value>| async move {
                    rec.push(&format!("status:{id}"), &headers, body);
                    StatusCode::NO_CONTENT
                },
            ),
        )
        .with_state(recorded)
}

#[tokio::test]
async fn test_access_check_and_headers() {
    let recorded = Recorded::default();
    let backend = start(app(recorded.clone())).await;

    assert!(backend.test_connection().await);

    let granted = backend
        .check_access(&CardId::new("123456789").unwrap(), Direction::In)
        .await
        .unwrap();
    let denied = backend
        .check_access(&CardId::new("999").unwrap(), Direction::Out)
        .await
        .unwrap();
    assert!(granted.authorized);
    assert!(!denied.authorized);

    let bodies = recorded.bodies.lock().unwrap().clone();
    assert_eq!(bodies[0].1["direction"], "in");
    assert_eq!(bodies[1].1["direction"], "out");
    assert_eq!(bodies[0].1["device_id"], "turnstile_001");

    let headers = recorded.headers.lock().unwrap().clone();
    assert_eq!(headers[0].0, "Bearer test-key");
    assert_eq!(headers[0].1, "turnstile_001");
}

#[tokio::test]
async fn test_sync_whitelist_and_updates() {
    let recorded = Recorded::default();
    let backend = start(app(recorded.clone())).await;

    let event = AccessEvent::new(
        "turnstile_001",
        CardId::new("42").unwrap(),
        Direction::In,
        false,
        true,
    );
    assert!(backend.sync_offline_logs(&[event]).await.unwrap());

    let whitelist = backend.get_whitelist().await.unwrap();
    assert_eq!(whitelist.len(), 2);

    let meta: UpdateMetadata = backend.check_updates().await.unwrap().unwrap();
    assert!(meta.update_available);
    assert_eq!(meta.format, ArchiveFormat::Zip);
    assert!(meta.requires_restart);

    let package = backend.download_update(&meta).await.unwrap();
    assert_eq!(&package[..], b"hello");

    backend
        .report_update_status(&meta.id, UpdateStatus::Failed, Some("hash mismatch"))
        .await
        .unwrap();

    let bodies = recorded.bodies.lock().unwrap().clone();
    let sync = bodies.iter().find(|(r, _)| r == "sync").unwrap();
    assert_eq!(sync.1["logs"][0]["card_id"], "42");
    let status = bodies.iter().find(|(r, _)| r == "status:u-7").unwrap();
    assert_eq!(status.1["status"], "failed");
    assert_eq!(status.1["error"], "hash mismatch");
}

#[tokio::test]
async fn test_missing_routes() {
    let backend = start(Router::new()).await;
    assert!(!backend.test_connection().await);
    assert!(backend.check_updates().await.unwrap().is_none());
    assert!(!backend.sync_offline_logs(&[]).await.unwrap());
    assert!(backend.get_whitelist().await.is_err());
}

#[tokio::test]
async fn test_credentials_stay_on_backend_origin() {
    let recorded = Recorded::default();
    let backend = start(app(recorded.clone())).await;
    let mirrored = Recorded::default();
    let elsewhere = serve(mirror(mirrored.clone(), Duration::ZERO)).await;

    let mut meta = UpdateMetadata::new("u-9", "2.0.0");
    meta.download_url = Some(format!("{}/updates/u-9/download", backend.config().base_url));
    assert_eq!(&backend.download_update(&meta).await.unwrap()[..], b"hello");

    meta.download_url = Some(format!("{elsewhere}/pkg/u-9"));
    assert_eq!(&backend.download_update(&meta).await.unwrap()[..], b"package");

    let own = recorded.headers.lock().unwrap().clone();
    assert_eq!(own, vec![("Bearer test-key".to_string(), "turnstile_001".to_string())]);
    let foreign = mirrored.headers.lock().unwrap().clone();
    assert_eq!(foreign, vec![(String::new(), String::new())]);
}

#[tokio::test]
async fn test_download_uses_its_own_timeout() {
    let recorded = Recorded::default();
    let elsewhere = serve(mirror(recorded, Duration::from_millis(600))).await;
    let mut meta = UpdateMetadata::new("u-slow", "2.0.0");
    meta.download_url = Some(format!("{elsewhere}/pkg/u-slow"));

    // Slower than an API call may take, within the download bound.
    let patient = start_with(Router::new(), Duration::from_millis(200), Duration::from_secs(5)).await;
    assert_eq!(&patient.download_update(&meta).await.unwrap()[..], b"package");

    let hasty = start_with(Router::new(), Duration::from_secs(5), Duration::from_millis(200)).await;
    assert!(hasty.download_update(&meta).await.is_err());
}
