//! # Mercato Job Worker
//!
//! Polls the job store for the catalog queues and serves the health and job
//! administration endpoints.

use actix_web::{App, HttpServer, web};
use tracing_actix_web::TracingLogger;

mod background;
mod catalog;
mod config;
mod handlers;
mod middleware;
mod observability;
mod state;
mod telemetry;

use config::AppConfig;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let telemetry_config = TelemetryConfig::from_env();
    init_telemetry(&telemetry_config);

    let config = AppConfig::from_env();
    tracing::info!(
        service = %telemetry_config.service_name,
        worker_id = %config.queue.polling.worker_id,
        "Starting job worker"
    );

    let state = AppState::new(&config).await?;
    catalog::register_queues(&state.queues, config.buffer_collections).await?;

    #[cfg(feature = "scheduler")]
    let mut scheduler = start_scheduler(&config, &state).await?;

    if config.http.enabled {
        tracing::info!(
            "Serving health endpoint on {}:{}",
            config.http.host,
            config.http.port
        );
        let server_state = state.clone();
        HttpServer::new(move || {
            App::new()
                .wrap(TracingLogger::default())
                .app_data(web::Data::new(server_state.clone()))
                .configure(handlers::configure_routes)
        })
        .bind((config.http.host.as_str(), config.http.port))?
        .run()
        .await?;
    } else {
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("Shutdown signal received");

    #[cfg(feature = "scheduler")]
    {
        if let Some(scheduler) = scheduler.as_mut() {
            if let Err(e) = scheduler.shutdown().await {
                tracing::warn!(error = %e, "Scheduler did not stop cleanly");
            }
        }
    }

    state.queues.stop().await;
    Ok(())
}

#[cfg(feature = "scheduler")]
async fn start_scheduler(
    config: &AppConfig,
    state: &AppState,
) -> anyhow::Result<Option<background::scheduler::Scheduler>> {
    if !config.maintenance.enabled {
        tracing::info!("Maintenance scheduler disabled");
        return Ok(None);
    }

    let scheduler = background::scheduler::Scheduler::new(config.maintenance.clone()).await?;
    scheduler.register_maintenance(state.queues.clone()).await?;
    scheduler.start().await?;
    Ok(Some(scheduler))
}
