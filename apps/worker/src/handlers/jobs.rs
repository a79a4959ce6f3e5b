//! Job administration endpoints.

use actix_web::{HttpResponse, web};
use chrono::Utc;

use mercato_core::ports::{JobFilter, JobListOptions, JobSort, JobSortField, QueueStats, SortOrder};
use mercato_core::{Job, JobId, JobState};
use mercato_shared::ApiResponse;
use mercato_shared::dto::{
    JobListQuery, JobListResponse, JobResponse, PurgeQuery, PurgeResponse, StatsResponse,
};

use crate::middleware::error::{AppError, AppResult};
use crate::state::AppState;

const MAX_PAGE_SIZE: u64 = 500;

pub fn job_response(job: &Job) -> JobResponse {
    JobResponse {
        id: job.id().map(|id| id.0).unwrap_or_default(),
        queue_name: job.queue_name().to_string(),
        data: job.data().clone(),
        state: job.state().to_string(),
        progress: job.progress(),
        result: job.result().cloned(),
        error: job.error().map(str::to_string),
        is_settled: job.is_settled(),
        retries: job.retries(),
        attempts: job.attempts(),
        created_at: job.created_at(),
        started_at: job.started_at(),
        settled_at: job.settled_at(),
        updated_at: job.updated_at(),
        duration_ms: job.duration().map(|d| d.num_milliseconds()),
    }
}

pub fn stats_response(stats: QueueStats) -> StatsResponse {
    StatsResponse {
        pending: stats.pending,
        running: stats.running,
        retrying: stats.retrying,
        completed: stats.completed,
        failed: stats.failed,
        cancelled: stats.cancelled,
    }
}

/// Translate the query string into store list options.
fn list_options(query: &JobListQuery) -> AppResult<JobListOptions> {
    let states = query
        .states()
        .iter()
        .map(|s| s.parse::<JobState>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let field = match query.sort.as_deref() {
        None | Some("createdAt") => JobSortField::CreatedAt,
        Some("id") => JobSortField::Id,
        Some("updatedAt") => JobSortField::UpdatedAt,
        Some("settledAt") => JobSortField::SettledAt,
        Some("queueName") => JobSortField::QueueName,
        Some(other) => return Err(AppError::InvalidRequest(format!("Unknown sort field: {other}"))),
    };
    let order = match query.order.as_deref().map(str::to_uppercase).as_deref() {
        None | Some("DESC") => SortOrder::Desc,
        Some("ASC") => SortOrder::Asc,
        Some(other) => return Err(AppError::InvalidRequest(format!("Unknown sort order: {other}"))),
    };

    Ok(JobListOptions {
        skip: query.skip.unwrap_or(0),
        take: Some(query.take.unwrap_or(50).min(MAX_PAGE_SIZE)),
        filter: JobFilter {
            queue_names: query.queue_names(),
            states,
            is_settled: query.settled,
        },
        sort: JobSort { field, order },
    })
}

/// GET /api/jobs
pub async fn list_jobs(
    state: web::Data<AppState>,
    query: web::Query<JobListQuery>,
) -> AppResult<HttpResponse> {
    let options = list_options(&query)?;
    let jobs = state.queues.find_many(&options).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(JobListResponse {
        items: jobs.items.iter().map(job_response).collect(),
        total_items: jobs.total_items,
    })))
}

/// GET /api/jobs/{id}
pub async fn get_job(state: web::Data<AppState>, path: web::Path<i64>) -> AppResult<HttpResponse> {
    let id = JobId(path.into_inner());
    let job = state
        .queues
        .find_one(id)
        .await?
        .ok_or(AppError::JobNotFound(id))?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(job_response(&job))))
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let id = JobId(path.into_inner());
    let job = state
        .queues
        .cancel_job(id)
        .await
        .map_err(|e| AppError::from(e).for_job(id))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(job_response(&job))))
}

/// DELETE /api/jobs/settled
pub async fn purge_settled(
    state: web::Data<AppState>,
    query: web::Query<PurgeQuery>,
) -> AppResult<HttpResponse> {
    let older_than = query
        .older_than_days
        .map(|days| Utc::now() - chrono::Duration::days(days as i64));
    let removed = state
        .queues
        .remove_settled(&query.queue_names(), older_than)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok_with_message(
        PurgeResponse { removed },
        format!("Removed {removed} settled jobs"),
    )))
}

/// GET /api/jobs/stats
pub async fn job_stats(
    state: web::Data<AppState>,
    query: web::Query<PurgeQuery>,
) -> AppResult<HttpResponse> {
    let queues = query.queue_names();
    let stats = match queues.as_slice() {
        [] => state.queues.stats(None).await?,
        [queue] => state.queues.stats(Some(queue)).await?,
        _ => {
            return Err(AppError::InvalidRequest(
                "Stats can be requested for one queue at a time".to_string(),
            ));
        }
    };
    Ok(HttpResponse::Ok().json(ApiResponse::ok(stats_response(stats))))
}
