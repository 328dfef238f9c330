//! Maps [`recon_db::RconError`] onto the HTTP status codes specified in §6/§7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use recon_db::RconError;

pub struct ApiError(pub RconError);

impl From<RconError> for ApiError {
    fn from(e: RconError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            RconError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RconError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            RconError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            RconError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
