//! Error handling middleware - RFC 7807 compliant responses.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use mercato_core::{JobId, QueueError, StoreError};
use mercato_shared::ErrorResponse;
use std::fmt;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    JobNotFound(JobId),
    InvalidRequest(String),
    /// The job's state does not allow the operation.
    JobStateConflict {
        job_id: Option<JobId>,
        detail: String,
    },
    StoreUnavailable(String),
    Internal(String),
}

impl AppError {
    /// Attach the job the failed operation targeted.
    pub fn for_job(self, id: JobId) -> Self {
        match self {
            AppError::JobStateConflict { detail, .. } => AppError::JobStateConflict {
                job_id: Some(id),
                detail,
            },
            other => other,
        }
    }

    fn job_id(&self) -> Option<i64> {
        match self {
            AppError::JobNotFound(id) => Some(id.0),
            AppError::JobStateConflict { job_id, .. } => job_id.map(|id| id.0),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::JobNotFound(id) => write!(f, "Job {} not found", id),
            AppError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            AppError::JobStateConflict { detail, .. } => write!(f, "{}", detail),
            AppError::StoreUnavailable(msg) => write!(f, "Job store unavailable: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::JobStateConflict { .. } => StatusCode::CONFLICT,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            AppError::JobNotFound(_) => ErrorResponse::job_not_found(self.to_string()),
            AppError::InvalidRequest(detail) => ErrorResponse::invalid_request(detail),
            AppError::JobStateConflict { detail, .. } => ErrorResponse::job_state_conflict(detail),
            AppError::StoreUnavailable(detail) => ErrorResponse::store_unavailable(detail),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                ErrorResponse::internal_error()
            }
        };

        HttpResponse::build(self.status_code()).json(error.with_job_id(self.job_id()))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable | StoreError::LeaseHeld { .. } => {
                AppError::StoreUnavailable(err.to_string())
            }
            StoreError::NotFound(id) => AppError::JobNotFound(id),
            StoreError::NotPersisted | StoreError::Query(_) | StoreError::Serialization(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Store(store) => store.into(),
            QueueError::State(state) => AppError::JobStateConflict {
                job_id: None,
                detail: state.to_string(),
            },
            QueueError::InvalidQueueName { .. } => AppError::InvalidRequest(err.to_string()),
            QueueError::DuplicateQueueRegistration(_) => AppError::Internal(err.to_string()),
            QueueError::BufferDropped | QueueError::Timeout { .. } => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use mercato_core::{JobState, JobStateError};

    #[test]
    fn test_queue_errors_map_to_statuses() {
        let cases = [
            (QueueError::Store(StoreError::Unavailable), 503),
            (QueueError::Store(StoreError::NotFound(JobId(3))), 404),
            (
                QueueError::State(JobStateError::new("cancel", JobState::Completed)),
                409,
            ),
            (
                QueueError::Store(StoreError::Query("syntax error".into())),
                500,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code().as_u16(), status);
        }
    }

    #[actix_rt::test]
    async fn test_conflict_body_names_the_job() {
        let err = AppError::from(QueueError::State(JobStateError::new(
            "cancel",
            JobState::Failed,
        )))
        .for_job(JobId(7));

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 409);
        assert_eq!(json["jobId"], 7);
        assert_eq!(json["type"], mercato_shared::response::problem::JOB_STATE_CONFLICT);
    }
}
