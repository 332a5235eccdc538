use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use portal::PortalError;
use thiserror::Error;

use crate::response::ApiResponse;

#[derive(Debug, Error, ts_rs::TS)]
#[ts(type = "string")]
pub enum ApiError {
    #[error(transparent)]
    Portal(#[from] PortalError),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Portal(err) => match err {
                PortalError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
                PortalError::RunNotFound(_) => (StatusCode::NOT_FOUND, "RunNotFound"),
                PortalError::RunSettled(_) => (StatusCode::CONFLICT, "RunSettled"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "PortalError"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        if status_code.is_server_error() {
            tracing::error!("{}: {}", error_type, self);
        }

        let error_message = match &self {
            ApiError::Portal(
                err @ (PortalError::Validation(_) | PortalError::RunNotFound(_) | PortalError::RunSettled(_)),
            ) => err.to_string(),
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            _ => format!("{}: {}", error_type, self),
        };
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use uuid::Uuid;

    use super::*;

    async fn render(err: ApiError) -> (StatusCode, ApiResponse<()>) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_portal_errors_map_to_status_codes() {
        let id = Uuid::new_v4();
        let cases = [
            (PortalError::Validation("goal must not be empty".into()), StatusCode::BAD_REQUEST),
            (PortalError::RunNotFound(id), StatusCode::NOT_FOUND),
            (PortalError::RunSettled(id), StatusCode::CONFLICT),
            (PortalError::Cancelled, StatusCode::INTERNAL_SERVER_ERROR),
            (PortalError::DatabaseError("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let (status, body) = render(err.into()).await;
            assert_eq!(status, expected);
            assert!(!body.success);
            assert!(body.data.is_none());
        }
    }

    #[tokio::test]
    async fn test_client_errors_keep_their_message() {
        let (_, body) = render(PortalError::Validation("goal must not be empty".into()).into()).await;
        assert_eq!(body.message.as_deref(), Some("Validation error: goal must not be empty"));

        let (_, body) = render(PortalError::DatabaseError("disk full".into()).into()).await;
        assert_eq!(body.message.as_deref(), Some("PortalError: Database error: disk full"));
    }
}
