use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use fleet_coord::api::{router, ApiState};
use fleet_coord::instruction::{self, InstructionReceiver, INSTRUCTIONS_ID};
use fleet_coord::state::{Document, InMemoryStateStore, State, StateStore};

/// Helper to create a test app backed by a fresh store
fn create_test_app() -> (Router, Arc<InMemoryStateStore>, InstructionReceiver) {
    let (inbox, receiver) = instruction::channel(4);
    let store = Arc::new(InMemoryStateStore::with_inbox(inbox));
    (router(ApiState::new(store.clone())), store, receiver)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn put(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_get_missing_document_returns_404() {
    let (app, _store, _rx) = create_test_app();

    let response = app.oneshot(get("/state/workload-state-svcA")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_then_get_round_trip() {
    let (app, store, _rx) = create_test_app();

    let body = json!({
        "id": "workload-state-svcA",
        "definition": {"properties": {"serviceName": "svcA", "serviceState": true}}
    });
    let response = app
        .clone()
        .oneshot(put("/state/workload-state-svcA", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.oneshot(get("/state/workload-state-svcA")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], "workload-state-svcA");
    assert_eq!(json["definition"]["properties"]["serviceName"], "svcA");

    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_put_replaces_and_returns_200() {
    let (app, store, _rx) = create_test_app();

    let first = app
        .clone()
        .oneshot(put("/state/doc", json!({"properties": {"a": 1}})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(put("/state/doc", json!({"properties": {"b": 2}})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let doc = store.get("doc").await.unwrap().unwrap();
    let state: State = doc.definition_as().unwrap();
    assert!(state.properties.get("a").is_none());
    assert_eq!(state.properties.get("b"), Some(&json!(2)));
}

#[tokio::test]
async fn test_path_id_wins_over_body_id() {
    let (app, store, _rx) = create_test_app();

    let response = app
        .oneshot(put(
            "/state/real-id",
            json!({"id": "other-id", "definition": {"properties": {}}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(store.get("real-id").await.unwrap().is_some());
    assert!(store.get("other-id").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_reports_presence() {
    let (app, store, _rx) = create_test_app();
    store
        .upsert(&Document::new("doc", &State::new()).unwrap())
        .await
        .unwrap();

    let response = app.clone().oneshot(delete("/state/doc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(delete("/state/doc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_instruction_put_is_delivered() {
    let (app, _store, mut rx) = create_test_app();

    let response = app
        .oneshot(put(
            "/state/instructions",
            json!({
                "id": INSTRUCTIONS_ID,
                "definition": {"type": "StartExecution", "properties": {"workloadId": "svcA"}}
            }),
        ))
        .await
        .unwrap();
    assert!(response.status().is_success());

    let instruction = rx.try_recv().expect("instruction should be queued");
    assert_eq!(instruction.workload_id().unwrap(), "svcA");
}

#[tokio::test]
async fn test_malformed_instruction_returns_400() {
    let (app, store, _rx) = create_test_app();

    let response = app
        .oneshot(put(
            "/state/instructions",
            json!({"definition": {"type": "Explode"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_heartbeat_is_always_ok() {
    let (app, _store, _rx) = create_test_app();

    let response = app.oneshot(get("/heartbeat")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["online"], true);
}

#[tokio::test]
async fn test_events_unavailable_without_dispatcher() {
    let (app, _store, _rx) = create_test_app();

    let response = app.oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["online"], false);
}
