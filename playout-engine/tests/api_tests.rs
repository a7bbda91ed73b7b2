//! Integration tests for the playout control API
//!
//! Drives the router in-process with `oneshot` requests against a running
//! engine task.

mod helpers;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use helpers::*;
use http_body_util::BodyExt;
use playout_engine::api::{build_router, AppContext};
use playout_engine::collaborators::Collaborators;
use playout_engine::playback::PlayoutService;
use playout_engine::SharedState;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_server() -> (axum::Router, Arc<StaticResolver>) {
    let (output, _control) = MockOutput::new();
    let resolver = Arc::new(StaticResolver::default());
    let collaborators = Collaborators {
        queue_provider: Arc::new(MemoryQueueProvider::default()),
        resolver: resolver.clone(),
        fallback: Arc::new(StaticFallback::new(fallback_playlist(2))),
        telemetry: Arc::new(RecordingTelemetry::default()),
    };
    let shared = Arc::new(SharedState::new());
    let (handle, _task) =
        PlayoutService::start(test_config(), Box::new(output), collaborators, shared.clone())
            .await;

    let ctx = AppContext {
        handle,
        state: shared,
        resolver: resolver.clone(),
    };
    (build_router(ctx), resolver)
}

async fn make_request(
    app: &axum::Router,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Option<Value>) {
    let mut request = Request::builder().method(method).uri(path);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let request = match body {
        Some(json_body) => request.body(Body::from(json_body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json_body = if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&bytes).ok()
    };
    (status, json_body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup_test_server().await;

    let (status, body) = make_request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.expect("Expected response body");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "playout");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_initial_status_is_idle() {
    let (app, _) = setup_test_server().await;

    let (status, body) = make_request(&app, Method::GET, "/playout/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["mode"], "idle");
    assert_eq!(body["volume"], 80);
    assert!(body["current_track"].is_null());
}

#[tokio::test]
async fn test_enqueue_known_and_unknown_tracks() {
    let (app, resolver) = setup_test_server().await;
    resolver.add(create_test_track("t1", 180.0));

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/playout/queue/enqueue",
        Some(json!({ "track_id": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/playout/queue/enqueue",
        Some(json!({ "track_id": "t1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["status"], "ok");

    let (status, body) = make_request(&app, Method::GET, "/playout/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["queue"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["queue"][0]["id"], "t1");
}

#[tokio::test]
async fn test_queue_index_out_of_range_is_bad_request() {
    let (app, _) = setup_test_server().await;

    let (status, body) = make_request(&app, Method::DELETE, "/playout/queue/7", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body.unwrap()["status"].as_str().unwrap_or_default().to_string();
    assert!(message.contains("out of range"), "{}", message);

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/playout/queue/move",
        Some(json!({ "from": 0, "to": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_volume_validation() {
    let (app, _) = setup_test_server().await;

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/playout/volume",
        Some(json!({ "volume": 150 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/playout/volume",
        Some(json!({ "volume": 40 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["volume"], 40);

    let (_, body) = make_request(&app, Method::GET, "/playout/status", None).await;
    assert_eq!(body.unwrap()["volume"], 40);
}

#[tokio::test]
async fn test_seek_while_idle_conflicts() {
    let (app, _) = setup_test_server().await;

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/playout/seek",
        Some(json!({ "position_seconds": 12.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/playout/seek",
        Some(json!({ "position_seconds": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_play_pause_resume_flow() {
    let (app, resolver) = setup_test_server().await;
    resolver.add(create_test_track("t1", 180.0));

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/playout/play",
        Some(json!({ "track_id": "t1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = make_request(&app, Method::GET, "/playout/status", None).await;
    let body = body.unwrap();
    assert_eq!(body["mode"], "playing");
    assert_eq!(body["current_track"]["id"], "t1");

    let (status, _) = make_request(&app, Method::POST, "/playout/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = make_request(&app, Method::GET, "/playout/status", None).await;
    assert_eq!(body.unwrap()["mode"], "paused");

    let (status, _) = make_request(&app, Method::POST, "/playout/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = make_request(&app, Method::GET, "/playout/status", None).await;
    assert_eq!(body.unwrap()["mode"], "playing");

    let (status, _) = make_request(&app, Method::POST, "/playout/skip-next", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = make_request(&app, Method::GET, "/playout/status", None).await;
    assert_eq!(body.unwrap()["mode"], "idle");
}
