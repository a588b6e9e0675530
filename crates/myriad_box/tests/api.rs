mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use common::Fake;
use common::coordinator;
use common::enabled;
use common::providers;
use common::settle;
use myriad_box::Board;
use myriad_box::Coordinator;
use myriad_box::api::AppState;
use myriad_box::api::create_router;
use myriad_box::provider::FetchError;
use serde_json::Value;
use serde_json::json;
use tower::ServiceExt;

async fn setup(fakes: &[Arc<Fake>], enable: &[&str]) -> (Router, Arc<Coordinator>) {
    let coordinator = coordinator(fakes);
    let board = Board::new(coordinator.clone());
    let _ = board.spawn();

    let configs: Vec<_> = enable.iter().map(|id| (*id, enabled())).collect();
    coordinator.initialize(&providers(&configs)).await.unwrap();
    settle().await;

    let router = create_router(AppState::new(coordinator.clone(), board));
    (router, coordinator)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::put(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_ping() {
    let (router, _) = setup(&[], &[]).await;

    let (status, body) = send(&router, get("/v1/ping")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test(start_paused = true)]
async fn test_info_reports_phase() {
    let (router, _) = setup(&[Arc::new(Fake::new("a"))], &["a"]).await;

    let (status, body) = send(&router, get("/v1/info")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "running");
    assert_eq!(body["enabled"], json!(["a"]));
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test(start_paused = true)]
async fn test_list_providers() {
    let (router, _) = setup(
        &[Arc::new(Fake::new("a")), Arc::new(Fake::new("b"))],
        &["b"],
    )
    .await;

    let (status, body) = send(&router, get("/v1/providers")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "a");
    assert_eq!(body[0]["enabled"], false);
    assert!(body[0].get("interval_secs").is_none());
    assert_eq!(body[1]["enabled"], true);
    assert_eq!(body[1]["interval_secs"], 60);
    assert_eq!(
        body[1]["fields"],
        json!([{"key": "label", "label": "Label", "kind": "text", "required": false, "default": "x"}])
    );
    assert_eq!(body[1]["sensors"], json!(["value"]));
}

#[tokio::test(start_paused = true)]
async fn test_sensors() {
    let a = Arc::new(Fake::new("a"));
    let b = Arc::new(Fake::new("b").script([common::Step::Fail(FetchError::network("refused"))]));
    let (router, _) = setup(&[a, b], &["a", "b"]).await;

    let (status, body) = send(&router, get("/v1/sensors")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["provider_id"], "a");
    assert_eq!(body[0]["value"], "1");
    assert_eq!(body[0]["available"], true);
    assert_eq!(body[1]["provider_id"], "b");
    assert_eq!(body[1]["value"], "unknown");
    assert_eq!(body[1]["available"], false);
    assert_eq!(body[1]["attributes"]["error_kind"], "network");
}

#[tokio::test(start_paused = true)]
async fn test_provider_sensors_not_found() {
    let (router, _) = setup(&[Arc::new(Fake::new("a"))], &[]).await;

    let (status, body) = send(&router, get("/v1/sensors/a")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "provider 'a' is not enabled");

    let (status, body) = send(&router, get("/v1/sensors/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown provider 'ghost'");
}

#[tokio::test(start_paused = true)]
async fn test_enable_through_api() {
    let a = Arc::new(Fake::new("a"));
    let (router, coordinator) = setup(&[a.clone()], &[]).await;

    let (status, _) = send(
        &router,
        put_json(
            "/v1/providers/a",
            json!({"interval_minutes": 5, "fields": {"label": "y"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(
        coordinator.interval("a"),
        Some(std::time::Duration::from_secs(300))
    );

    settle().await;
    let (status, body) = send(&router, get("/v1/sensors/a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["value"], "1");
}

#[tokio::test(start_paused = true)]
async fn test_disable_through_api() {
    let (router, coordinator) = setup(&[Arc::new(Fake::new("a"))], &["a"]).await;

    let (status, _) = send(&router, put_json("/v1/providers/a", json!({"enabled": false}))).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!coordinator.is_enabled("a"));
    let (status, _) = send(&router, get("/v1/sensors/a")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_update_is_bad_request() {
    let (router, _) = setup(&[Arc::new(Fake::new("a"))], &["a"]).await;

    let (status, body) = send(
        &router,
        put_json("/v1/providers/a", json!({"fields": {"colour": "blue"}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "invalid configuration for 'a': field 'colour' is not a known field"
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_after_shutdown_conflicts() {
    let (router, coordinator) = setup(&[Arc::new(Fake::new("a"))], &["a"]).await;
    coordinator.shutdown().await;

    let (status, _) = send(&router, put_json("/v1/providers/a", json!({}))).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_through_api() {
    let a = Arc::new(Fake::new("a"));
    let (router, _) = setup(&[a.clone(), Arc::new(Fake::new("b"))], &["a"]).await;

    let request = Request::post("/v1/providers/a/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    settle().await;
    assert_eq!(a.calls(), 2);

    let request = Request::post("/v1/providers/b/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
