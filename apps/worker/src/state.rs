//! Application state - shared across all handlers.

use std::sync::Arc;

use mercato_core::ports::{BackoffStrategy, JobStore};
use mercato_infra::{InMemoryJobStore, JobQueueService};

use crate::config::AppConfig;

#[cfg(feature = "sql")]
use std::time::Duration;

#[cfg(feature = "sql")]
use mercato_infra::database::DbConn;
#[cfg(feature = "sql")]
use mercato_infra::{DatabaseConfig, SqlJobStore};

#[cfg(feature = "sql")]
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub queues: Arc<JobQueueService>,
}

impl AppState {
    /// Build the job store and the queue service on top of it.
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let backoff = config.backoff.strategy();
        tracing::info!(
            backoff = ?config.backoff.kind,
            base_ms = config.backoff.base.as_millis() as u64,
            "Retry backoff configured"
        );

        let store = build_store(config, backoff).await?;
        let queues = Arc::new(JobQueueService::new(store, config.queue.clone()));

        tracing::info!("Application state initialized");
        Ok(Self { queues })
    }
}

#[cfg(feature = "sql")]
async fn build_store(
    config: &AppConfig,
    backoff: Arc<dyn BackoffStrategy>,
) -> anyhow::Result<Arc<dyn JobStore>> {
    let Some(db_config) = &config.database else {
        return Ok(in_memory_store(backoff));
    };

    match connect(db_config, config.run_migrations).await {
        Ok(conn) => {
            let store: Arc<dyn JobStore> =
                Arc::new(SqlJobStore::with_connection(conn).with_backoff(backoff));
            Ok(store)
        }
        Err(e) => {
            // Keep serving: store calls fail with `Unavailable` until a
            // reconnect attaches a connection.
            tracing::error!(error = %e, "Failed to connect to job database, retrying in background");
            let store = Arc::new(SqlJobStore::new().with_backoff(backoff));
            tokio::spawn(reconnect(
                store.clone(),
                db_config.clone(),
                config.run_migrations,
            ));
            let store: Arc<dyn JobStore> = store;
            Ok(store)
        }
    }
}

#[cfg(not(feature = "sql"))]
async fn build_store(
    _config: &AppConfig,
    backoff: Arc<dyn BackoffStrategy>,
) -> anyhow::Result<Arc<dyn JobStore>> {
    tracing::info!("Running without sql feature - using in-memory job store");
    Ok(in_memory_store(backoff))
}

fn in_memory_store(backoff: Arc<dyn BackoffStrategy>) -> Arc<dyn JobStore> {
    tracing::warn!("DATABASE_URL not set. Jobs are kept in memory and lost on restart.");
    Arc::new(InMemoryJobStore::new().with_backoff(backoff))
}

#[cfg(feature = "sql")]
async fn connect(
    config: &DatabaseConfig,
    run_migrations: bool,
) -> anyhow::Result<DbConn> {
    use migration::{Migrator, MigratorTrait};

    let conn = config.connect().await?;
    if run_migrations {
        Migrator::up(&conn, None).await?;
        tracing::info!("Job schema migrations applied");
    }
    Ok(conn)
}

#[cfg(feature = "sql")]
async fn reconnect(store: Arc<SqlJobStore>, config: DatabaseConfig, run_migrations: bool) {
    loop {
        tokio::time::sleep(RECONNECT_INTERVAL).await;
        match connect(&config, run_migrations).await {
            Ok(conn) => {
                store.attach(conn).await;
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Job database still unreachable"),
        }
    }
}
