//! Standardized API response types (RFC 7807 compliant for errors).

use serde::{Deserialize, Serialize};

/// Standard successful API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

/// Problem type URIs used by the job admin API.
pub mod problem {
    pub const INVALID_REQUEST: &str = "/problems/invalid-request";
    pub const JOB_NOT_FOUND: &str = "/problems/job-not-found";
    pub const JOB_STATE_CONFLICT: &str = "/problems/job-state-conflict";
    pub const STORE_UNAVAILABLE: &str = "/problems/job-store-unavailable";
}

/// RFC 7807 Problem Details for HTTP APIs.
///
/// See: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The request path the problem occurred on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Extension member: the job the problem concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
}

impl ErrorResponse {
    /// A problem without a specific type (`about:blank`).
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self::typed("about:blank", status, title)
    }

    pub fn typed(problem_type: &str, status: u16, title: impl Into<String>) -> Self {
        Self {
            problem_type: problem_type.to_string(),
            title: title.into(),
            status,
            detail: None,
            instance: None,
            job_id: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_job_id(mut self, job_id: Option<i64>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::typed(problem::INVALID_REQUEST, 400, "Invalid request").with_detail(detail)
    }

    pub fn job_not_found(detail: impl Into<String>) -> Self {
        Self::typed(problem::JOB_NOT_FOUND, 404, "Job not found").with_detail(detail)
    }

    /// The job is in a state that does not allow the operation.
    pub fn job_state_conflict(detail: impl Into<String>) -> Self {
        Self::typed(problem::JOB_STATE_CONFLICT, 409, "Job state conflict").with_detail(detail)
    }

    pub fn store_unavailable(detail: impl Into<String>) -> Self {
        Self::typed(problem::STORE_UNAVAILABLE, 503, "Job store unavailable").with_detail(detail)
    }

    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_details_shape() {
        let problem = ErrorResponse::job_state_conflict("Cannot cancel a job in state COMPLETED")
            .with_instance("/api/jobs/4/cancel")
            .with_job_id(Some(4));
        let json = serde_json::to_value(&problem).unwrap();

        assert_eq!(json["type"], problem::JOB_STATE_CONFLICT);
        assert_eq!(json["status"], 409);
        assert_eq!(json["jobId"], 4);
        assert_eq!(json["instance"], "/api/jobs/4/cancel");

        let internal = serde_json::to_value(ErrorResponse::internal_error()).unwrap();
        assert_eq!(internal["type"], "about:blank");
        assert!(internal.get("detail").is_none());
        assert!(internal.get("jobId").is_none());
    }
}
