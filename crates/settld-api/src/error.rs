//! The single domain-error → HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use settld_types::SettldError;

/// Wrapper giving `SettldError` an HTTP rendering. Internal details never
/// leak; the request id is stamped into the body by the request-id layer.
#[derive(Debug)]
pub struct ApiError(pub SettldError);

impl From<SettldError> for ApiError {
    fn from(err: SettldError) -> Self {
        Self(err)
    }
}

impl From<settld_crypto::CryptoError> for ApiError {
    fn from(err: settld_crypto::CryptoError) -> Self {
        Self(SettldError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &err {
            SettldError::Internal { .. } => "internal error".to_string(),
            other => other.to_string(),
        };
        if matches!(err, SettldError::Internal { .. }) {
            tracing::error!(code = err.code(), "internal error: {err}");
        }
        let mut body = json!({
            "code": err.code(),
            "message": message,
        });
        if let Some(details) = err.details() {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}

/// Handler result alias
pub type ApiResult<T> = Result<T, ApiError>;
