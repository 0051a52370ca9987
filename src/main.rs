use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use notification_relay::broker::{
    BrokerPublisher, DryRunTopicClient, RedisTopicClient, TopicClient,
};
use notification_relay::config::{Settings, WebTransportKind};
use notification_relay::outbox::{OutboxStore, PostgresOutboxStore};
use notification_relay::postgres::PostgresPool;
use notification_relay::realtime::{
    BackplaneSubscriber, GroupRegistry, GroupTransport, LocalGroupTransport, RedisGroupTransport,
    WebNotificationPublisher,
};
use notification_relay::redis::RedisPool;
use notification_relay::server::{create_app, AppState};
use notification_relay::shutdown::{drain_tasks, shutdown_signal};
use notification_relay::tasks::HeartbeatTask;
use notification_relay::telemetry::init_telemetry;
use notification_relay::worker::{spawn_workers, DeliveryChannel};

/// How long workers get to commit their current batch after shutdown
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Arc::new(Settings::new()?);
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let postgres = PostgresPool::new(&settings.database).await?;
    if settings.database.run_migrations {
        postgres.run_migrations().await?;
    }
    let store: Arc<dyn OutboxStore> = Arc::new(PostgresOutboxStore::new(postgres.pool().clone()));

    let redis = Arc::new(RedisPool::new(settings.redis.clone())?);
    let publish_timeout = settings.outbox.publish_timeout();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut background = Vec::new();

    // Broker channel
    let broker = if settings.broker.is_enabled() {
        let client: Arc<dyn TopicClient> = if settings.broker.dry_run {
            tracing::warn!(topic = %settings.broker.topic, "Broker dry run: publishes are only logged");
            Arc::new(DryRunTopicClient::new())
        } else {
            Arc::new(RedisTopicClient::new(redis.clone(), &settings.broker))
        };
        tracing::info!(
            topic = %settings.broker.topic,
            fifo = settings.broker.fifo,
            client = client.name(),
            "Broker channel enabled"
        );
        Some(Arc::new(BrokerPublisher::new(
            client,
            settings.broker.clone(),
            publish_timeout,
        )))
    } else {
        None
    };

    // Web channel
    let registry = Arc::new(GroupRegistry::new());
    let local = LocalGroupTransport::new(registry.clone(), publish_timeout);
    let web = if settings.web.enabled {
        let transport: Arc<dyn GroupTransport> = match settings.web.transport {
            WebTransportKind::Local => Arc::new(local.clone()),
            WebTransportKind::Redis => {
                let subscriber = BackplaneSubscriber::new(
                    redis.clone(),
                    settings.web.backplane_channel.clone(),
                    local.clone(),
                    shutdown_tx.subscribe(),
                );
                background.push(tokio::spawn(subscriber.run()));
                Arc::new(RedisGroupTransport::new(
                    redis.clone(),
                    settings.web.backplane_channel.clone(),
                ))
            }
        };
        tracing::info!(
            hub_path = %settings.web.hub_path,
            transport = transport.name(),
            "Web channel enabled"
        );

        let heartbeat = HeartbeatTask::new(
            settings.web.clone(),
            registry.clone(),
            shutdown_tx.subscribe(),
        );
        background.push(tokio::spawn(heartbeat.run()));

        Some(Arc::new(WebNotificationPublisher::new(
            transport,
            settings.web.clone(),
            publish_timeout,
        )))
    } else {
        None
    };

    let channels = DeliveryChannel::enabled(broker, web);
    let workers = spawn_workers(store.clone(), channels, &settings.outbox, &shutdown_tx);
    tracing::info!(count = workers.handles.len(), "Outbox workers started");

    let state = AppState::new(settings.clone(), store, registry, workers.statuses)
        .with_postgres(postgres.clone());
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await?;

    // Covers a server error exit as well as the signal path
    let _ = shutdown_tx.send(());

    tracing::info!("Waiting for outbox workers to commit in-flight batches...");
    let stopped = drain_tasks(workers.handles, WORKER_DRAIN_TIMEOUT).await;
    tracing::info!(stopped = stopped, "Outbox workers stopped");

    drain_tasks(background, Duration::from_secs(5)).await;
    postgres.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
