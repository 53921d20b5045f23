//! API error handling

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use calmesh_types::CalError;

/// Wrapper mapping core errors onto the wire contract: everything surfaces
/// as 500 with `{"error": message}`.
pub struct ApiError(pub CalError);

impl From<CalError> for ApiError {
    fn from(error: CalError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.error_code(),
        });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
