use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::Internal(err) => {
                tracing::error!("API internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<chatline_core::CoreError> for ApiError {
    fn from(e: chatline_core::CoreError) -> Self {
        match e {
            chatline_core::CoreError::NotFound => ApiError::NotFound,
            chatline_core::CoreError::Forbidden => ApiError::Forbidden,
            chatline_core::CoreError::BadRequest(msg) => ApiError::BadRequest(msg),
            chatline_core::CoreError::Conflict(msg) => ApiError::Conflict(msg),
            chatline_core::CoreError::Database(_) => {
                ApiError::Internal(anyhow::anyhow!("database error"))
            }
            chatline_core::CoreError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<chatline_db::DbError> for ApiError {
    fn from(e: chatline_db::DbError) -> Self {
        match e {
            chatline_db::DbError::NotFound => ApiError::NotFound,
            chatline_db::DbError::Sqlx(_) => ApiError::Internal(anyhow::anyhow!("database error")),
        }
    }
}

impl From<chatline_core::DispatchError> for ApiError {
    fn from(e: chatline_core::DispatchError) -> Self {
        match e {
            chatline_core::DispatchError::NotAParticipant => ApiError::Forbidden,
            chatline_core::DispatchError::Persistence(_) => {
                ApiError::Internal(anyhow::anyhow!("message persistence failed"))
            }
        }
    }
}
