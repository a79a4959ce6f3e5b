//! HTTP handlers and route configuration.

mod health;
mod jobs;

use actix_web::web;

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .service(
            web::scope("/api/jobs")
                .route("", web::get().to(jobs::list_jobs))
                .route("/stats", web::get().to(jobs::job_stats))
                .route("/settled", web::delete().to(jobs::purge_settled))
                .route("/{id}", web::get().to(jobs::get_job))
                .route("/{id}/cancel", web::post().to(jobs::cancel_job)),
        );
}
