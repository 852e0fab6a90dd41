use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::WithRejection;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("upstream service failed: {0}")]
    Upstream(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),

    /// Request body the JSON extractor refused, keeping its status.
    #[error("{1}")]
    Rejected(StatusCode, String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON request body whose rejections render as `{"detail": ...}`.
pub type JsonBody<T> = WithRejection<Json<T>, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        ApiError::Rejected(r.status(), r.body_text())
    }
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Rejected(status, _) => *status,
            ApiError::Storage(_) | ApiError::Codec(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            match self {
                ApiError::Upstream(_) => "Upstream service unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let e = ApiError::bad_request("Amount must be positive");
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.to_string(), "Amount must be positive");
        assert_eq!(ApiError::NotFound("Gift not found").status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn body_rejections_keep_status() {
        let e = ApiError::Rejected(StatusCode::UNPROCESSABLE_ENTITY, "missing field `amount`".into());
        assert_eq!(e.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(e.to_string(), "missing field `amount`");
    }

    #[test]
    fn server_errors_map_to_500() {
        let e = ApiError::Internal("boom".into());
        assert_eq!(e.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
