// End-to-end tests for the REST surface (spec §6), exercised without a
// real LLM or plugin subprocess -- covers agent CRUD, settings persistence,
// and the error-kind-to-status mapping (spec §7).

use std::sync::Arc;

use agentforge::agent_store::AgentStore;
use agentforge::chat_engine::ChatEngine;
use agentforge::events::EventBus;
use agentforge::http::{self, AppState};
use agentforge::llm::AdapterRegistry;
use agentforge::plugin_host::{ArtifactCache, PluginHost, PluginRegistry, PluginUpdater};
use agentforge::settings::SettingsStore;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> (axum::Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let agent_store = Arc::new(AgentStore::new(dir.path().join("agents.json")));
    let plugin_host = Arc::new(PluginHost::new("1.0.0", "v1"));

    let registry_path = dir.path().join("plugins.json");
    tokio::fs::write(&registry_path, r#"{"plugins": []}"#).await.unwrap();
    let plugin_registry = Arc::new(PluginRegistry::load(&registry_path).await.unwrap());

    let artifact_cache = Arc::new(ArtifactCache::new(dir.path().join("cache")));
    let updater = Arc::new(PluginUpdater::new(
        plugin_registry.clone(),
        artifact_cache.clone(),
        plugin_host.clone(),
        dir.path().join("backups"),
    ));

    let adapters = Arc::new(AdapterRegistry::new());
    let chat_engine = Arc::new(ChatEngine::new(agent_store.clone(), plugin_host.clone(), adapters.clone()));
    let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")));

    let state = AppState {
        agent_store,
        plugin_host,
        plugin_registry,
        artifact_cache,
        updater,
        adapters,
        chat_engine,
        events: Arc::new(EventBus::new()),
        settings,
        shutdown: tokio_util::sync::CancellationToken::new(),
    };

    (http::router(state), dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok_and_version() {
    let (app, _dir) = test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn create_list_and_delete_agent_round_trip() {
    let (app, _dir) = test_app().await;

    let create = Request::builder()
        .method("POST")
        .uri("/api/agents")
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "helper", "type": "general"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let list = app.clone().oneshot(Request::builder().uri("/api/agents").body(Body::empty()).unwrap()).await.unwrap();
    let body = body_json(list).await;
    assert_eq!(body["agents"].as_array().unwrap().len(), 1);

    let delete = Request::builder().method("DELETE").uri("/api/agents?name=helper").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let missing = Request::builder().uri("/api/agents/helper").body(Body::empty()).unwrap();
    let response = app.oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_agent_rejects_unknown_field() {
    let (app, _dir) = test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/agents")
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "helper", "nickname": "nope"}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_against_a_missing_agent_is_not_found() {
    let (app, _dir) = test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({"agent": "nope", "message": "hi"}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settings_round_trip_and_reject_unknown_field() {
    let (app, _dir) = test_app().await;

    let save = Request::builder()
        .method("POST")
        .uri("/api/settings")
        .header("content-type", "application/json")
        .body(Body::from(json!({"allowedOrigins": ["http://localhost:3000"]}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(save).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let load = app.clone().oneshot(Request::builder().uri("/api/settings").body(Body::empty()).unwrap()).await.unwrap();
    let settings = body_json(load).await;
    assert_eq!(settings["allowedOrigins"][0], "http://localhost:3000");

    let bad = Request::builder()
        .method("POST")
        .uri("/api/settings")
        .header("content-type", "application/json")
        .body(Body::from(json!({"bogusField": true}).to_string()))
        .unwrap();
    let response = app.oneshot(bad).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
