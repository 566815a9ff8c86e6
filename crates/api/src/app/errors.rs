use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use jobrelay_core::DomainError;
use jobrelay_infra::{AgentRegistryError, BlueprintStoreError, SchedulerError, TaskStoreError};

/// Every failure a handler can return, rendered as `{"error", "message"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Storage(String),
}

impl ApiError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ApiError::InvalidTransition(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        json_error(status, code, self.to_string())
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(_) | DomainError::InvalidId(_) => ApiError::Validation(e.to_string()),
            DomainError::InvariantViolation(_) => ApiError::InvalidTransition(e.to_string()),
            DomainError::NotFound => ApiError::NotFound(e.to_string()),
            DomainError::Conflict(_) => ApiError::Conflict(e.to_string()),
        }
    }
}

impl From<TaskStoreError> for ApiError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            TaskStoreError::Conflict { .. } => ApiError::Conflict(e.to_string()),
            TaskStoreError::InvalidTransition(_) => ApiError::InvalidTransition(e.to_string()),
            TaskStoreError::Storage(_) => ApiError::Storage(e.to_string()),
        }
    }
}

impl From<AgentRegistryError> for ApiError {
    fn from(e: AgentRegistryError) -> Self {
        match e {
            AgentRegistryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            AgentRegistryError::OwnershipMismatch(_) => ApiError::Forbidden(e.to_string()),
            AgentRegistryError::Storage(_) => ApiError::Storage(e.to_string()),
        }
    }
}

impl From<BlueprintStoreError> for ApiError {
    fn from(e: BlueprintStoreError) -> Self {
        match e {
            BlueprintStoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            BlueprintStoreError::Invalid(inner) => inner.into(),
            BlueprintStoreError::Storage(_) => ApiError::Storage(e.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::AlreadyRunning { .. } => ApiError::Conflict(e.to_string()),
            SchedulerError::Blueprints(inner) => inner.into(),
            SchedulerError::Tasks(inner) => inner.into(),
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrelay_core::{BlueprintId, TaskId};
    use jobrelay_tasks::TaskType;

    #[test]
    fn store_errors_map_to_statuses() {
        let status = |e: ApiError| e.parts().0;
        assert_eq!(status(TaskStoreError::NotFound(TaskId::new()).into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status(
                TaskStoreError::Conflict {
                    blueprint_id: BlueprintId::new(),
                    task_type: TaskType::Scrape,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(
                SchedulerError::AlreadyRunning {
                    blueprint_id: BlueprintId::new(),
                    task_type: TaskType::AutoApply,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(BlueprintStoreError::Invalid(DomainError::validation("frequency")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(AgentRegistryError::OwnershipMismatch("a".into()).into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(TaskStoreError::Storage("down".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
