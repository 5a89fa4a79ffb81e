//! Server-side integration tests: gateway, registry, reclaimer and HTTP API

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;

use ara_realtime_service::config::{GatewayConfig, ReclaimerConfig, Settings};
use ara_realtime_service::gateway::{
    GatewayResponse, HandlerError, HandlerRegistry, MessageContext, MessageHandler,
    TransportGateway,
};
use ara_realtime_service::registry::{
    ConnectionRecord, ConnectionRegistry, ConnectionStatus, MemoryRegistry,
};
use ara_realtime_service::server::{create_app, AppState};
use ara_realtime_service::tasks::StaleConnectionReclaimer;

/// Counts invocations and acknowledges text messages
struct CountingHandler {
    calls: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, _ctx: &MessageContext, message: &Value) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(json!({ "echo": message["text"] }))
    }
}

#[tokio::test]
async fn test_connect_message_disconnect_sweep_scenario() {
    let registry = Arc::new(MemoryRegistry::new());
    let counter = Arc::new(CountingHandler {
        calls: Default::default(),
    });
    let mut handlers = HandlerRegistry::with_defaults();
    handlers.register("text-message", counter.clone());

    let gateway = TransportGateway::new(
        GatewayConfig::default(),
        registry.clone(),
        Arc::new(handlers),
    );
    let reclaimer = StaleConnectionReclaimer::new(ReclaimerConfig::default(), registry.clone());

    // Connect without a user id
    let response = gateway.on_connect("c1", None).await;
    assert!(response.is_success());
    let record = registry.get("c1").await.unwrap().unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.user_id, "anonymous");
    let connected_at = record.last_activity;

    // Message touches and dispatches once
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let response = gateway
        .on_message("c1", r#"{"type":"text-message","text":"hello"}"#)
        .await;
    match response {
        GatewayResponse::Reply { connection_id, body, .. } => {
            assert_eq!(connection_id, "c1");
            assert_eq!(body["echo"], "hello");
        }
        other => panic!("unexpected response: {:?}", other),
    }
    assert_eq!(counter.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    let record = registry.get("c1").await.unwrap().unwrap();
    assert!(record.last_activity > connected_at);
    assert!(record.last_activity >= record.created_at);

    // Disconnect removes the record
    assert!(gateway.on_disconnect("c1").await.is_success());
    assert!(registry.get("c1").await.unwrap().is_none());

    // Nothing left to reclaim
    let report = reclaimer.sweep().await.unwrap();
    assert_eq!(report.reclaimed, 0);
}

#[tokio::test]
async fn test_unknown_type_preserves_connection_id() {
    let registry = Arc::new(MemoryRegistry::new());
    let gateway = TransportGateway::new(
        GatewayConfig::default(),
        registry,
        Arc::new(HandlerRegistry::with_defaults()),
    );
    gateway.on_connect("conn-42", Some("u1")).await;

    let response = gateway.on_message("conn-42", r#"{"type":"warp-drive"}"#).await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.connection_id(), "conn-42");

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["type"], "unknown-message-type");
    assert_eq!(json["receivedType"], "warp-drive");
}

#[tokio::test]
async fn test_scan_stale_is_exact_and_repeatable() {
    let registry = MemoryRegistry::new();
    let now = Utc::now();
    for (id, idle_minutes) in [("a", 5), ("b", 59), ("c", 61), ("d", 600)] {
        let record = ConnectionRecord::connected_at(id, "u1", now - Duration::minutes(idle_minutes));
        assert_ok!(registry.put(&record).await);
    }

    let cutoff = now - Duration::hours(1);
    let mut first: Vec<String> = registry
        .scan_stale(cutoff)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.connection_id)
        .collect();
    first.sort();
    assert_eq!(first, vec!["c", "d"]);

    let mut second: Vec<String> = registry
        .scan_stale(cutoff)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.connection_id)
        .collect();
    second.sort();
    assert_eq!(first, second);
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_user_connections_endpoint() {
    let state = AppState::new(Settings::default(), None);
    state.gateway.on_connect("c1", Some("alice")).await;
    state.gateway.on_connect("c2", Some("alice")).await;
    state.gateway.on_connect("c3", Some("bob")).await;
    state.registry.mark_disconnected("c2").await.unwrap();

    let app = create_app(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/alice/connections")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["connections"][0]["connectionId"], "c1");
    assert_eq!(body["connections"][0]["status"], "CONNECTED");
}

#[tokio::test]
async fn test_connection_lookup_not_found() {
    let app = create_app(AppState::new(Settings::default(), None));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/connections/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_reclaim_endpoint_reports_sweep() {
    let state = AppState::new(Settings::default(), None);
    let stale = ConnectionRecord::connected_at("old", "u1", Utc::now() - Duration::hours(3));
    state.registry.put(&stale).await.unwrap();

    let registry = state.registry.clone();
    let app = create_app(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/reclaim")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["reclaimed"], 1);
    assert_eq!(body["failed"], 0);

    let record = registry.get("old").await.unwrap().unwrap();
    assert_eq!(record.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = AppState::new(Settings::default(), None);
    state.gateway.on_connect("c1", None).await;

    let response = create_app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["registry"]["backend"], "memory");
    assert_eq!(body["registry"]["stats"]["connected"], 1);
}
