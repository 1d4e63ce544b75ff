//! Error taxonomy for every HTTP handler.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use capsule_types::api::{FieldError, MessageBody, ValidationErrors};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input, reported field by field.
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    /// Rejected input that is not tied to a single field.
    #[error("{0}")]
    BadRequest(String),
    /// Missing, invalid or expired token, or acting on someone else's capsule.
    #[error("{0}")]
    Unauthorized(String),
    /// The capsule exists but its unlock time has not come.
    #[error("Capsule is locked")]
    Locked,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn field(field: &str, msg: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError {
            field: field.to_string(),
            msg: msg.into(),
        }])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Locked => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            ApiError::Validation(errors) => (status, Json(ValidationErrors { errors })).into_response(),
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (status, Json(MessageBody { msg: "Server error".into() })).into_response()
            }
            other => (status, Json(MessageBody { msg: other.to_string() })).into_response(),
        }
    }
}

/// Any unreadable JSON body is a 400 with a fixed message.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected JSON body: {}", rejection.body_text());
        let msg = match rejection {
            JsonRejection::MissingJsonContentType(_) => "Request body must be JSON",
            _ => "Malformed JSON body",
        };
        ApiError::BadRequest(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_lists_fields() {
        let (status, body) = body_json(ApiError::field("title", "Title is required")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "title");
        assert_eq!(body["errors"][0]["msg"], "Title is required");
    }

    #[tokio::test]
    async fn locked_is_403() {
        let (status, body) = body_json(ApiError::Locked).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["msg"], "Capsule is locked");
    }

    #[tokio::test]
    async fn not_found_names_the_resource() {
        let (status, body) = body_json(ApiError::NotFound("Time Capsule")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["msg"], "Time Capsule not found");
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak() {
        let err = ApiError::from(anyhow::anyhow!("disk /var/lib/capsules is full"));
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["msg"], "Server error");
    }
}
