use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::outbox::OutboxStore;
use crate::postgres::PostgresPool;
use crate::realtime::GroupRegistry;
use crate::worker::WorkerStatus;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<GroupRegistry>,
    pub store: Arc<dyn OutboxStore>,
    pub workers: Arc<Vec<Arc<WorkerStatus>>>,
    pub postgres_pool: Option<PostgresPool>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn OutboxStore>,
        registry: Arc<GroupRegistry>,
        workers: Vec<Arc<WorkerStatus>>,
    ) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));

        Self {
            settings,
            jwt_validator,
            registry,
            store,
            workers: Arc::new(workers),
            postgres_pool: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_postgres(mut self, pool: PostgresPool) -> Self {
        self.postgres_pool = Some(pool);
        self
    }
}
