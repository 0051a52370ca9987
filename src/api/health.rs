//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::realtime::RegistryStats;
use crate::server::AppState;
use crate::worker::{WorkerState, WorkerStatsSnapshot};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    pub workers: Vec<WorkerHealthResponse>,
    pub connections: RegistryStats,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub pool_size: u32,
    pub idle_connections: u32,
}

#[derive(Debug, Serialize)]
pub struct WorkerHealthResponse {
    pub worker_id: usize,
    pub state: WorkerState,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pending_events: Option<i64>,
    pub totals: WorkerTotals,
    pub workers: Vec<WorkerStatsSnapshot>,
    pub connections: RegistryStats,
}

#[derive(Debug, Default, Serialize)]
pub struct WorkerTotals {
    pub batches: u64,
    pub published: u64,
    pub failed: u64,
    pub exhausted: u64,
    pub loop_errors: u64,
}

impl WorkerTotals {
    fn from_snapshots(snapshots: &[WorkerStatsSnapshot]) -> Self {
        snapshots.iter().fold(Self::default(), |mut totals, s| {
            totals.batches += s.batches;
            totals.published += s.published;
            totals.failed += s.failed;
            totals.exhausted += s.exhausted;
            totals.loop_errors += s.loop_errors;
            totals
        })
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = match state.store.pending_count().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Outbox store health check failed");
            false
        }
    };

    let postgres = state.postgres_pool.as_ref().map(|pool| {
        let (pool_size, idle_connections) = pool.pool_stats();
        PostgresHealthResponse {
            pool_size,
            idle_connections,
        }
    });

    let workers: Vec<WorkerHealthResponse> = state
        .workers
        .iter()
        .map(|w| WorkerHealthResponse {
            worker_id: w.snapshot().worker_id,
            state: w.state(),
        })
        .collect();

    let paused = workers.iter().any(|w| w.state == WorkerState::Paused);
    let status = if !reachable || paused {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: StoreHealthResponse {
            backend: state.store.name().to_string(),
            reachable,
        },
        postgres,
        workers,
        connections: state.registry.stats(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let workers: Vec<WorkerStatsSnapshot> = state.workers.iter().map(|w| w.snapshot()).collect();
    let pending_events = state.store.pending_count().await.ok();

    Json(StatsResponse {
        pending_events,
        totals: WorkerTotals::from_snapshots(&workers),
        workers,
        connections: state.registry.stats(),
    })
}
