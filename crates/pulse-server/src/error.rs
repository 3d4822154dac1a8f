//! HTTP surface for the shared error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use pulse_core::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = match &error {
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Server(_) | Error::Network(_) | Error::Timeout(_) => StatusCode::BAD_GATEWAY,
            // client closed / deadline; nginx's 499 has no constant
            Error::Cancelled(_) => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_GATEWAY),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!(code = error.code(), error = %error, "request failed");
        }

        let mut body = serde_json::json!({
            "errorCode": error.code(),
            "message": error.to_string(),
        });
        if let Error::Validation { fields, .. } = &error {
            if !fields.is_empty() {
                body["fields"] = serde_json::json!(fields);
            }
        }
        if let Some(retry_after) = error.retry_after() {
            body["retryAfter"] = serde_json::json!(retry_after.as_secs());
        }

        (status, Json(body)).into_response()
    }
}
