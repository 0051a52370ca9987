//! HTTP surface and group transport integration tests
//!
//! The router is driven with `tower::ServiceExt::oneshot`, backed by the
//! in-memory outbox store; no server, database or Redis is started.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;
use uuid::Uuid;

use notification_relay::broker::{BrokerPublisher, MemoryTopicClient};
use notification_relay::config::{
    BrokerConfig, DatabaseConfig, JwtConfig, OtelConfig, OutboxConfig, RedisConfig, ServerConfig,
    Settings, WebConfig,
};
use notification_relay::envelope::NotificationEnvelope;
use notification_relay::outbox::MemoryOutboxStore;
use notification_relay::realtime::{GroupRegistry, GroupTransport, LocalGroupTransport};
use notification_relay::server::{create_app, AppState};
use notification_relay::worker::{spawn_workers, DeliveryChannel};

const SECRET: &str = "integration-secret";

fn settings(web_enabled: bool) -> Settings {
    Settings {
        server: ServerConfig::default(),
        database: DatabaseConfig {
            url: "postgres://localhost/relay".to_string(),
            pool_size: 1,
            connect_timeout_seconds: 1,
            idle_timeout_seconds: 10,
            run_migrations: false,
        },
        redis: RedisConfig::default(),
        outbox: OutboxConfig {
            poll_interval_ms: 20,
            ..OutboxConfig::default()
        },
        broker: BrokerConfig::default(),
        web: WebConfig {
            enabled: web_enabled,
            ..WebConfig::default()
        },
        jwt: JwtConfig {
            secret: SECRET.to_string(),
            issuer: None,
            audience: None,
        },
        otel: OtelConfig::default(),
    }
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_health_reports_paused_workers_as_degraded() {
    let store = MemoryOutboxStore::new();
    let (tx, _) = broadcast::channel(1);
    let settings = Arc::new(settings(false));
    let workers = spawn_workers(
        Arc::new(store.clone()),
        DeliveryChannel::enabled(None, None),
        &settings.outbox,
        &tx,
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = AppState::new(
        settings,
        Arc::new(store),
        Arc::new(GroupRegistry::new()),
        workers.statuses,
    );
    let (status, body) = get_json(create_app(state), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["store"]["backend"], "memory");
    assert_eq!(body["store"]["reachable"], true);
    assert_eq!(body["workers"][0]["state"], "paused");

    tx.send(()).unwrap();
}

#[tokio::test]
async fn test_stats_counts_pending_and_published() {
    let store = MemoryOutboxStore::new();
    let client = Arc::new(MemoryTopicClient::new());
    let settings = Arc::new(settings(false));

    for _ in 0..3 {
        store
            .enqueue(&NotificationEnvelope::new("x", [Uuid::new_v4()]))
            .unwrap();
    }
    // One event the broker can never accept
    store
        .enqueue(&NotificationEnvelope::new("x", Vec::<Uuid>::new()))
        .unwrap();

    let broker = BrokerPublisher::new(
        client.clone(),
        BrokerConfig {
            topic: "notifications".to_string(),
            ..BrokerConfig::default()
        },
        Duration::from_secs(1),
    );
    let (tx, _) = broadcast::channel(1);
    let workers = spawn_workers(
        Arc::new(store.clone()),
        DeliveryChannel::enabled(Some(Arc::new(broker)), None),
        &settings.outbox,
        &tx,
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while store
            .snapshot()
            .iter()
            .any(|r| r.published_at.is_none() && r.failed_attempts == 0)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let state = AppState::new(
        settings,
        Arc::new(store.clone()),
        Arc::new(GroupRegistry::new()),
        workers.statuses,
    );
    let (status, body) = get_json(create_app(state), "/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending_events"], 1);
    assert_eq!(body["totals"]["published"], 3);
    assert_eq!(body["totals"]["failed"], 1);
    assert_eq!(body["connections"]["total_connections"], 0);

    tx.send(()).unwrap();
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_relay_metrics() {
    let state = AppState::new(
        Arc::new(settings(false)),
        Arc::new(MemoryOutboxStore::new()),
        Arc::new(GroupRegistry::new()),
        Vec::new(),
    );
    let response = create_app(state)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("relay_"));
}

#[tokio::test]
async fn test_hub_route_absent_when_web_disabled() {
    let state = AppState::new(
        Arc::new(settings(false)),
        Arc::new(MemoryOutboxStore::new()),
        Arc::new(GroupRegistry::new()),
        Vec::new(),
    );
    let response = create_app(state)
        .oneshot(
            Request::builder()
                .uri("/hubs/notifications")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_local_transport_skips_closed_connections() {
    let registry = Arc::new(GroupRegistry::new());
    let recipient = Uuid::new_v4();
    let group = format!("user-{}", recipient.simple());

    let (open_tx, mut open_rx) = mpsc::channel(4);
    let (closed_tx, closed_rx) = mpsc::channel(4);
    registry.join(recipient, group.clone(), open_tx);
    registry.join(recipient, group.clone(), closed_tx);
    drop(closed_rx);

    let transport = LocalGroupTransport::new(registry.clone(), Duration::from_millis(200));
    let delivered = transport
        .send_to_group(&group, Arc::from("{\"type\":\"heartbeat\"}"))
        .await
        .unwrap();

    assert_eq!(delivered, 1);
    assert!(open_rx.recv().await.is_some());

    // Unknown group is not an error
    assert_eq!(
        transport
            .send_to_group("user-nobody", Arc::from("{}"))
            .await
            .unwrap(),
        0
    );
}
