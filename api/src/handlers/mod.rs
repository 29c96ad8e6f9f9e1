pub mod health;
pub mod history;
pub mod metrics;
pub mod schedule;
pub mod slots;

// Common response types
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::errors::{ApiError, AuthError, ScheduleError};
use serde::Serialize;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub trace_id: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "not_found" => StatusCode::NOT_FOUND,
            "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" | "state_error" => StatusCode::CONFLICT,
            "rule_violation" => StatusCode::UNPROCESSABLE_ENTITY,
            "upstream_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApiError> for ErrorResponse {
    fn from(err: ApiError) -> Self {
        Self {
            details: err.details,
            ..Self::new(err.code, err.message)
        }
    }
}

impl From<ScheduleError> for ErrorResponse {
    fn from(err: ScheduleError) -> Self {
        if let ScheduleError::Internal(detail) = &err {
            tracing::error!(error = %detail, "Request failed with internal error");
        }
        ApiError::from(err).into()
    }
}

impl From<AuthError> for ErrorResponse {
    fn from(err: AuthError) -> Self {
        ApiError::from(err).into()
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Standard API success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for SuccessResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_map_to_status() {
        let cases = [
            (ScheduleError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ScheduleError::Conflict("overlap".into()), StatusCode::CONFLICT),
            (ScheduleError::finalized(), StatusCode::CONFLICT),
            (ScheduleError::RuleViolation("rule".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ScheduleError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (ScheduleError::Internal("db".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ErrorResponse::from(err).status(), status);
        }
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let response = ErrorResponse::from(ScheduleError::Internal("password=hunter2".into()));
        assert!(!response.message.contains("hunter2"));
    }
}
