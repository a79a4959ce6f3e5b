//! Health check endpoint.

use actix_web::{HttpResponse, web};
use mercato_shared::dto::HealthResponse;

use super::jobs::stats_response;
use crate::state::AppState;

/// Health check endpoint - store availability and queue activity.
///
/// GET /health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let queues = &state.queues;
    let store_available = queues.store().is_available().await;
    let stats = match queues.stats(None).await {
        Ok(stats) => Some(stats_response(stats)),
        Err(e) => {
            tracing::debug!(error = %e, "Job stats unavailable for health check");
            None
        }
    };

    let response = HealthResponse {
        status: if store_available { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store_available,
        registered_queues: queues.queue_names().await,
        polled_queues: queues.polled_queues().await,
        buffered_jobs: queues.buffer_sizes().await,
        stats,
    };

    if store_available {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
